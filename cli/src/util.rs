use cropdoc_core::TransportError;
use serde::Serialize;
use serde_json::json;

/// Exit codes: 0=success, 1=client error (4xx), 2=server error (5xx or
/// malformed body), 3=connection error, 4=usage error
pub const EXIT_OK: i32 = 0;
pub const EXIT_CLIENT_ERROR: i32 = 1;
pub const EXIT_SERVER_ERROR: i32 = 2;
pub const EXIT_CONNECTION_ERROR: i32 = 3;
pub const EXIT_USAGE_ERROR: i32 = 4;

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    eprintln!("{}", pretty(&error_body("cli_error", message, docs_hint)));
    std::process::exit(EXIT_USAGE_ERROR);
}

pub fn error_body(error: &str, message: &str, docs_hint: Option<&str>) -> serde_json::Value {
    let mut err = json!({
        "error": error,
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    err
}

pub fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

pub fn print_json<T: Serialize>(value: &T) -> i32 {
    println!("{}", pretty(value));
    EXIT_OK
}

pub fn transport_exit_code(err: &TransportError) -> i32 {
    match err {
        TransportError::Request(_) => EXIT_CONNECTION_ERROR,
        TransportError::Status { status, .. } if (400..500).contains(status) => EXIT_CLIENT_ERROR,
        TransportError::Status { .. } | TransportError::Malformed(_) => EXIT_SERVER_ERROR,
    }
}

pub fn transport_error_body(err: &TransportError) -> serde_json::Value {
    match err {
        TransportError::Request(_) => error_body(
            "connection_error",
            &err.to_string(),
            Some("Is the knowledge base reachable? Check CROPDOC_API_URL."),
        ),
        TransportError::Status { status, .. } => {
            let mut body = error_body("knowledge_base_error", &err.to_string(), None);
            body["status"] = json!(status);
            body
        }
        TransportError::Malformed(_) => error_body(
            "malformed_response",
            &err.to_string(),
            Some("The knowledge base answered with an unexpected shape."),
        ),
    }
}

/// Print a structured transport error to stderr and return its exit code.
pub fn report_transport_error(err: &TransportError) -> i32 {
    eprintln!("{}", pretty(&transport_error_body(err)));
    transport_exit_code(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_status_class() {
        assert_eq!(
            transport_exit_code(&TransportError::Request("refused".into())),
            EXIT_CONNECTION_ERROR
        );
        assert_eq!(
            transport_exit_code(&TransportError::Status {
                status: 404,
                message: "no crop".into()
            }),
            EXIT_CLIENT_ERROR
        );
        assert_eq!(
            transport_exit_code(&TransportError::Status {
                status: 503,
                message: "down".into()
            }),
            EXIT_SERVER_ERROR
        );
        assert_eq!(
            transport_exit_code(&TransportError::Malformed("not json".into())),
            EXIT_SERVER_ERROR
        );
    }

    #[test]
    fn status_errors_carry_status_field() {
        let body = transport_error_body(&TransportError::Status {
            status: 502,
            message: "bad gateway".into(),
        });
        assert_eq!(body["error"], "knowledge_base_error");
        assert_eq!(body["status"], 502);
        assert!(body.get("docs_hint").is_none());
    }

    #[test]
    fn connection_errors_hint_at_config() {
        let body = transport_error_body(&TransportError::Request("timed out".into()));
        assert_eq!(body["error"], "connection_error");
        assert!(body["docs_hint"].as_str().unwrap().contains("CROPDOC_API_URL"));
    }
}
