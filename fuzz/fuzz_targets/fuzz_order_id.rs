#![no_main]

use libfuzzer_sys::fuzz_target;
use rxcoord::contracts::DateKey;
use rxcoord::orders::{parse_order_id, validate_order_id};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);

    // Must not panic, and validation must agree with parsing
    let parsed = parse_order_id(&raw);
    assert_eq!(validate_order_id(&raw), parsed.is_some());

    // Anything accepted formats back to the exact input
    if let Some(id) = parsed {
        assert_eq!(id.to_string(), raw);
        let date = id.date().expect("accepted identifiers carry a real date");
        assert!(DateKey::parse(DateKey::from_date(date).as_str()).is_ok());
    }

    let _ = DateKey::parse(&raw);
});
