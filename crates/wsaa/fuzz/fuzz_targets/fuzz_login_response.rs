//! Fuzz target for LoginCms response decoding.
//!
//! Feeds arbitrary strings as SOAP response bodies. Every result must be
//! either `Ok(...)` or `Err(TicketError)`, and any ticket produced must
//! expire after it was issued.

#![no_main]

use arca_wsaa::{Identity, soap};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Response bodies are decoded as text before parsing
    let Ok(body) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(identity) = Identity::new(20_123_456_789) else {
        return;
    };

    // The body itself may already be a loginTicketResponse
    if let Ok(ticket) = soap::parse_ticket_response(body, identity) {
        assert!(ticket.expires_at > ticket.issued_at);
    }

    if let Ok(payload) = soap::parse_login_cms_response(body) {
        assert!(!payload.trim().is_empty());
        if let Ok(ticket) = soap::parse_ticket_response(&payload, identity) {
            assert!(ticket.expires_at > ticket.issued_at);
            assert!(!ticket.token.is_empty());
        }
    }
});
