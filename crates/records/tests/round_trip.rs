use chrono::{NaiveDate, NaiveDateTime};
use nightbatch_core::{Decimal, DecimalSpec};
use nightbatch_records::{
    Account, CategoryBalance, FieldType, FixedWidthRecord, RecordLayout, Transaction, decode,
    encode,
};
use proptest::prelude::*;

fn text(max: usize) -> impl Strategy<Value = String> {
    // Trailing spaces are padding and do not survive decode.
    proptest::string::string_regex(&format!("[A-Z0-9 .,-]{{0,{max}}}"))
        .unwrap()
        .prop_map(|s| s.trim_end().to_string())
}

/// Names as they appear on real merchant files, fitted to `max` bytes.
fn utf8_text(max: usize) -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            Just("A"), Just("z"), Just(" "), Just("é"), Just("ü"), Just("ß"), Just("€"),
        ],
        0..max,
    )
    .prop_map(move |parts| {
        let mut s = String::new();
        for part in parts {
            if s.len() + part.len() > max {
                break;
            }
            s.push_str(part);
        }
        s.trim_end().to_string()
    })
}

fn amount(spec: DecimalSpec) -> impl Strategy<Value = Decimal> {
    let limit = 10i128.pow(spec.total_digits() as u32) - 1;
    (-limit..=limit).prop_map(move |units| Decimal::from_units(units, spec).unwrap())
}

fn date() -> impl Strategy<Value = Option<NaiveDate>> {
    prop_oneof![
        Just(None),
        (1990i32..2099, 1u32..=12, 1u32..=28)
            .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
    ]
}

fn timestamp() -> impl Strategy<Value = Option<NaiveDateTime>> {
    (date(), 0u32..24, 0u32..60, 0u32..60, 0u32..1_000_000).prop_map(|(d, h, mi, s, us)| {
        d.and_then(|d| d.and_hms_micro_opt(h, mi, s, us))
    })
}

prop_compose! {
    fn transaction()(
        id in "[0-9]{16}",
        type_code in "[0-9]{2}",
        category_code in 0u16..10_000,
        source in text(10),
        description in text(100),
        amount in amount(DecimalSpec::AMOUNT),
        merchant_id in 0u64..1_000_000_000,
        merchant_name in text(50),
        merchant_city in text(50),
        merchant_zip in text(10),
        card_number in "[0-9]{16}",
        origin_ts in timestamp(),
        processed_ts in timestamp(),
    ) -> Transaction {
        Transaction {
            id, type_code, category_code, source, description, amount, merchant_id,
            merchant_name, merchant_city, merchant_zip, card_number, origin_ts, processed_ts,
        }
    }
}

prop_compose! {
    fn account()(
        id in 0u64..100_000_000_000,
        active in any::<bool>(),
        current_balance in amount(DecimalSpec::BALANCE),
        credit_limit in amount(DecimalSpec::BALANCE),
        cash_credit_limit in amount(DecimalSpec::BALANCE),
        open_date in date(),
        expiration_date in date(),
        reissue_date in date(),
        cycle_credit in amount(DecimalSpec::BALANCE),
        cycle_debit in amount(DecimalSpec::BALANCE),
        zip in text(10),
        group_id in text(10),
    ) -> Account {
        Account {
            id, active, current_balance, credit_limit, cash_credit_limit, open_date,
            expiration_date, reissue_date, cycle_credit, cycle_debit, zip, group_id,
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    /// Property: decode(encode(decode(line))) == decode(line), and the bytes are reproduced.
    #[test]
    fn transaction_lines_round_trip(txn in transaction()) {
        let line = txn.encode().unwrap();
        let layout = Transaction::layout();

        let first = decode(layout, &line).unwrap();
        let reencoded = encode(layout, &first).unwrap();
        prop_assert_eq!(&reencoded, &line);
        prop_assert_eq!(decode(layout, &reencoded).unwrap(), first);
        prop_assert_eq!(Transaction::decode(&line).unwrap(), txn);
    }

    /// Property: account lines survive a decode/encode cycle byte for byte.
    #[test]
    fn account_lines_round_trip(acct in account()) {
        let line = acct.encode().unwrap();
        prop_assert_eq!(line.len(), 300);
        let back = Account::decode(&line).unwrap();
        prop_assert_eq!(back.encode().unwrap(), line);
        prop_assert_eq!(back, acct);
    }

    /// Property: a corrupted digit in a numeric field is reported at that field's offset.
    #[test]
    fn corrupted_balance_is_located(
        balance in amount(DecimalSpec::AMOUNT),
        position in 0usize..10,
    ) {
        let record = CategoryBalance {
            account_id: 1,
            type_code: "01".into(),
            category_code: 1,
            balance,
        };
        let mut line = record.encode().unwrap();
        let offset = CategoryBalance::layout().field("balance").unwrap().offset;
        line[offset + position] = b'#';

        let err = CategoryBalance::decode(&line).unwrap_err();
        prop_assert_eq!(err.field.as_str(), "balance");
        prop_assert_eq!(err.offset, offset);
    }

    /// Property: lines in a valid but non-canonical form (plain last digit
    /// in a signed field, arbitrary filler, UTF-8 text) still re-encode to
    /// the same bytes and decode to the same record.
    #[test]
    fn non_canonical_transaction_lines_round_trip(
        mut txn in transaction(),
        plain_sign in any::<bool>(),
        merchant in utf8_text(50),
        filler in "[ -~]{20}",
    ) {
        txn.merchant_name = merchant;
        let layout = Transaction::layout();
        let mut line = txn.encode().unwrap();

        let amount = layout.field("amount").unwrap();
        let last = amount.offset + amount.length - 1;
        if plain_sign && !txn.amount.is_negative() {
            let digit = b"{ABCDEFGHI".iter().position(|c| *c == line[last]).unwrap();
            line[last] = b'0' + digit as u8;
        }
        let gap = layout.fields().iter().find(|f| f.kind == FieldType::Filler).unwrap();
        line[gap.offset..gap.offset + gap.length].copy_from_slice(filler.as_bytes());

        let first = decode(layout, &line).unwrap();
        let reencoded = encode(layout, &first).unwrap();
        prop_assert_eq!(&reencoded, &line);
        prop_assert_eq!(decode(layout, &reencoded).unwrap(), first);
        prop_assert_eq!(Transaction::decode(&line).unwrap(), txn);
    }

    /// Property: every accepted packed sign nibble survives re-encoding.
    #[test]
    fn packed_sign_forms_round_trip(units in -99_999i128..=99_999, alternate in any::<bool>()) {
        let layout = RecordLayout::builder("packed")
            .packed("value", DecimalSpec::new(3, 2).unwrap(), true)
            .build();
        let value = Decimal::from_units(units, DecimalSpec::new(3, 2).unwrap()).unwrap();
        let canonical = encode(
            &layout,
            &nightbatch_records::DecodedRecord::new("packed")
                .with("value", nightbatch_records::FieldValue::Number(value)),
        )
        .unwrap();

        let mut line = canonical.clone();
        if alternate {
            let sign = line.last_mut().unwrap();
            // F for an unsigned-looking positive, D for a negative zero.
            *sign = match units {
                0 => (*sign & 0xF0) | 0x0D,
                u if u > 0 => (*sign & 0xF0) | 0x0F,
                _ => *sign,
            };
        }

        let record = decode(&layout, &line).unwrap();
        prop_assert_eq!(record.number("value").unwrap(), value);
        prop_assert_eq!(encode(&layout, &record).unwrap(), line);
    }
}
