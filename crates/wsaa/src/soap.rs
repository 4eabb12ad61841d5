//! `LoginCms` SOAP 1.1 framing and response decoding.
//!
//! The authority wraps the issued ticket twice: the SOAP body carries a
//! `loginCmsReturn` element whose text is an escaped `loginTicketResponse`
//! document. Element matching uses local names only, since the namespace
//! prefixes the authority emits are not stable across deployments.

use chrono::{DateTime, Utc};
use quick_xml::{Reader, events::Event};
use serde::Deserialize;

use crate::{
    error::{Result, TicketError},
    types::{Identity, Ticket},
};

const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const WSAA_NS: &str = "http://wsaa.view.sua.dvadac.desein.afip.gov";

/// Renders the `loginCms` request with `cms_base64` as its `in0` argument.
#[must_use]
pub fn login_cms_request(cms_base64: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><soapenv:Envelope xmlns:soapenv="{SOAP_ENVELOPE_NS}" xmlns:wsaa="{WSAA_NS}"><soapenv:Header/><soapenv:Body><wsaa:loginCms><wsaa:in0>{cms_base64}</wsaa:in0></wsaa:loginCms></soapenv:Body></soapenv:Envelope>"#
    )
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Return,
    FaultCode,
    FaultString,
}

/// Extracts the `loginCmsReturn` payload from a SOAP response body.
///
/// # Errors
///
/// - [`TicketError::AuthorityRejected`] if the body contains a SOAP fault
/// - [`TicketError::Parse`] if the body is not well-formed XML or carries neither a return value
///   nor a fault
pub fn parse_login_cms_response(body: &str) -> Result<String> {
    let mut reader = Reader::from_str(body);
    let mut current: Option<Field> = None;
    let mut saw_fault = false;
    let mut login_return: Option<String> = None;
    let mut fault_code = String::new();
    let mut fault_string = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| TicketError::parse_with_source("malformed SOAP response", e))?;
        match event {
            Event::Start(start) => {
                current = match start.local_name().as_ref() {
                    b"loginCmsReturn" => {
                        login_return.get_or_insert_with(String::new);
                        Some(Field::Return)
                    },
                    b"Fault" => {
                        saw_fault = true;
                        None
                    },
                    b"faultcode" => Some(Field::FaultCode),
                    b"faultstring" => Some(Field::FaultString),
                    _ => None,
                };
            },
            Event::Empty(empty) => {
                if empty.local_name().as_ref() == b"loginCmsReturn" {
                    login_return.get_or_insert_with(String::new);
                }
            },
            Event::Text(text) => {
                let Some(field) = current else { continue };
                let text = text
                    .unescape()
                    .map_err(|e| TicketError::parse_with_source("malformed SOAP text", e))?;
                match field {
                    Field::Return => login_return.get_or_insert_with(String::new).push_str(&text),
                    Field::FaultCode => fault_code.push_str(&text),
                    Field::FaultString => fault_string.push_str(&text),
                }
            },
            Event::CData(data) => {
                let Some(field) = current else { continue };
                let text = String::from_utf8_lossy(&data);
                match field {
                    Field::Return => login_return.get_or_insert_with(String::new).push_str(&text),
                    Field::FaultCode => fault_code.push_str(&text),
                    Field::FaultString => fault_string.push_str(&text),
                }
            },
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => {},
        }
    }

    if saw_fault {
        return Err(TicketError::authority_rejected(fault_code, fault_string.trim()));
    }
    match login_return {
        Some(payload) if !payload.trim().is_empty() => Ok(payload),
        Some(_) => Err(TicketError::parse("loginCmsReturn is empty")),
        None => Err(TicketError::parse("response contains neither loginCmsReturn nor a SOAP fault")),
    }
}

#[derive(Deserialize)]
struct LoginTicketResponse {
    header: ResponseHeader,
    credentials: Credentials,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseHeader {
    generation_time: String,
    expiration_time: String,
}

#[derive(Deserialize)]
struct Credentials {
    token: String,
    sign: String,
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| TicketError::parse_with_source(format!("invalid {field} {value:?}"), e))
}

/// Decodes a `loginTicketResponse` document into a [`Ticket`] for
/// `identity`.
///
/// # Errors
///
/// Returns [`TicketError::Parse`] if the document is malformed, a required
/// field is missing or empty, or the ticket expires before it is issued.
pub fn parse_ticket_response(xml: &str, identity: Identity) -> Result<Ticket> {
    let response: LoginTicketResponse = quick_xml::de::from_str(xml.trim())
        .map_err(|e| TicketError::parse_with_source("malformed loginTicketResponse", e))?;

    let issued_at = parse_time("generationTime", &response.header.generation_time)?;
    let expires_at = parse_time("expirationTime", &response.header.expiration_time)?;
    if expires_at <= issued_at {
        return Err(TicketError::parse(format!(
            "ticket expires at {expires_at} before it is issued at {issued_at}"
        )));
    }

    let Credentials { token, sign } = response.credentials;
    if token.trim().is_empty() || sign.trim().is_empty() {
        return Err(TicketError::parse("ticket credentials are empty"));
    }

    Ok(Ticket { token, sign, identity, issued_at, expires_at })
}
