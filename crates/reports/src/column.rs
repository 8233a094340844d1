//! Column geometry: every value is cut or padded to its column's width.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

/// One fixed-width report column.
///
/// Text that does not fit keeps its leftmost characters. A number that does
/// not fit is never cut (that would change its value); the column is filled
/// with `*` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub width: usize,
    pub align: Align,
    pub numeric: bool,
}

impl Column {
    pub const fn text(name: &'static str, width: usize) -> Self {
        Self {
            name,
            width,
            align: Align::Left,
            numeric: false,
        }
    }

    pub const fn number(name: &'static str, width: usize) -> Self {
        Self {
            name,
            width,
            align: Align::Right,
            numeric: true,
        }
    }

    pub fn render(&self, value: &str) -> String {
        if self.numeric && value.chars().count() > self.width {
            return "*".repeat(self.width);
        }
        fit(value, self.width, self.align)
    }

    /// The heading, aligned like the column's values.
    pub fn heading(&self) -> String {
        fit(self.name, self.width, self.align)
    }
}

/// Cut or pad `value` to exactly `width` characters.
pub fn fit(value: &str, width: usize, align: Align) -> String {
    let len = value.chars().count();
    if len >= width {
        return value.chars().take(width).collect();
    }
    let pad = " ".repeat(width - len);
    match align {
        Align::Left => format!("{value}{pad}"),
        Align::Right => format!("{pad}{value}"),
    }
}
