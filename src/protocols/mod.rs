//! Wire protocol: content negotiation and multipart framing.

pub mod multipart;

use http::header::ACCEPT;
use http::HeaderMap;
use mediatype::names::APPLICATION;
use mediatype::names::JSON;
use mediatype::names::MIXED;
use mediatype::names::MULTIPART;
use mediatype::names::_STAR;
use mediatype::MediaTypeList;
use mediatype::ReadParams;

pub const APPLICATION_JSON_HEADER_VALUE: &str = "application/json";
pub const GRAPHQL_JSON_RESPONSE_HEADER_VALUE: &str = "application/graphql-response+json";

// the supported `@defer` specification version is
// https://github.com/graphql/graphql-spec/pull/742/commits/01d7b98f04810c9a9db4c0e53d3c4d54dbf10b82
pub const MULTIPART_DEFER_SPEC_PARAMETER: &str = "deferSpec";
pub const MULTIPART_DEFER_SPEC_VALUE: &str = "20220824";
pub const MULTIPART_DEFER_CONTENT_TYPE: &str =
    "multipart/mixed;boundary=\"graphql\";deferSpec=20220824";

/// How a response should be delivered to this consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// The consumer opted into incremental delivery: stream multipart
    /// chunks as they resolve.
    Incremental,
    /// Deliver one complete JSON payload once everything has resolved.
    Single,
}

/// Pick the delivery mode for a request.
///
/// Incremental delivery is only used when the consumer explicitly asked
/// for the defer multipart media type; anything else degrades to a single
/// complete response so the consumer never receives framing it cannot
/// parse.
pub fn negotiate(headers: &HeaderMap) -> DeliveryMode {
    if accepts_multipart(headers) {
        DeliveryMode::Incremental
    } else {
        DeliveryMode::Single
    }
}

/// Returns true if the headers contain `accept: application/json` or
/// `accept: application/graphql-response+json`, or if there is no `accept`
/// header
pub fn accepts_json(headers: &HeaderMap) -> bool {
    !headers.contains_key(ACCEPT)
        || headers.get_all(ACCEPT).iter().any(|value| {
            value
                .to_str()
                .map(|accept_str| {
                    let mut list = MediaTypeList::new(accept_str);

                    list.any(|mime| {
                        mime.as_ref()
                            .map(|mime| {
                                (mime.ty == APPLICATION && mime.subty == JSON)
                                    || (mime.ty == APPLICATION
                                        && mime.subty.as_str() == "graphql-response"
                                        && mime.suffix == Some(JSON))
                            })
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false)
        })
}

/// Returns true if the headers contain header `accept: */*`
pub fn accepts_wildcard(headers: &HeaderMap) -> bool {
    headers.get_all(ACCEPT).iter().any(|value| {
        value
            .to_str()
            .map(|accept_str| {
                let mut list = MediaTypeList::new(accept_str);

                list.any(|mime| {
                    mime.as_ref()
                        .map(|mime| (mime.ty == _STAR && mime.subty == _STAR))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    })
}

/// Returns true if the headers contain an accept header enabling defer
pub fn accepts_multipart(headers: &HeaderMap) -> bool {
    headers.get_all(ACCEPT).iter().any(|value| {
        value
            .to_str()
            .map(|accept_str| {
                let mut list = MediaTypeList::new(accept_str);

                list.any(|mime| {
                    mime.as_ref()
                        .map(|mime| {
                            mime.ty == MULTIPART
                                && mime.subty == MIXED
                                && mime.get_param(
                                    mediatype::Name::new(MULTIPART_DEFER_SPEC_PARAMETER)
                                        .expect("valid name"),
                                ) == Some(
                                    mediatype::Value::new(MULTIPART_DEFER_SPEC_VALUE)
                                        .expect("valid value"),
                                )
                        })
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    })
}
