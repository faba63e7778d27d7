use reqwest::StatusCode;

use chat_api::error::parse_error_message;
use chat_api::retry::is_retryable_http_error;

#[test]
fn parse_error_message_reads_string_error_field() {
    let body = r#"{"error":"conversation_id is required"}"#;
    let message = parse_error_message(StatusCode::BAD_REQUEST, body);
    assert_eq!(message, "conversation_id is required");
}

#[test]
fn parse_error_message_reads_nested_message() {
    let body = r#"{"error":{"code":"bad_request","message":"invalid deployment"}}"#;
    let message = parse_error_message(StatusCode::BAD_REQUEST, body);
    assert_eq!(message, "invalid deployment");
}

#[test]
fn parse_error_message_falls_back_to_raw_body() {
    let message = parse_error_message(StatusCode::INTERNAL_SERVER_ERROR, "raw failure text");
    assert_eq!(message, "raw failure text");
}

#[test]
fn parse_error_message_uses_reason_for_empty_body() {
    let message = parse_error_message(StatusCode::BAD_GATEWAY, "");
    assert_eq!(message, "Bad Gateway");
}

#[test]
fn retryable_statuses_and_error_text() {
    for status in [429, 500, 502, 503, 504] {
        assert!(is_retryable_http_error(status, ""));
    }
    assert!(is_retryable_http_error(400, "Rate limit exceeded"));
    assert!(is_retryable_http_error(400, "upstream connect error"));
    assert!(!is_retryable_http_error(400, "content filtered"));
}
