//! Fuzz target for ticket request rendering.
//!
//! Arbitrary service names must either be rejected or produce XML that
//! declares the service inside a `loginTicketRequest` root.

#![no_main]

use std::time::Duration;

use arca_wsaa::RequestBuilder;
use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(service) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(builder) = RequestBuilder::with_seed(Duration::from_secs(600), 1) else {
        return;
    };
    let Some(now) = Utc.timestamp_opt(1_740_830_400, 0).single() else {
        return;
    };

    let request = builder.build(service, now);
    if let Ok(xml) = request.to_xml() {
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<loginTicketRequest"));
        assert!(xml.contains("</loginTicketRequest>"));
    }
});
