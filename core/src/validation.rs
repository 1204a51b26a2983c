//! Option validation, run before any network activity.
//!
//! Structural checks come from deserializing into `ActionOptions`; the
//! rest are semantic checks serde cannot express, followed by existence
//! checks for every file the request body references. The input is only
//! borrowed, so validating the same options twice gives the same answer.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::context::{check_destination, ActionSnapshot};
use crate::error::ActionError;
use crate::types::{ActionOptions, Destination, ParamValue, RequestBody, ResponseSpec, Scalar};

const SCALAR_ONLY: &str = "must be a string, number or boolean";

/// Which handler the options are validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Generic,
    Json,
    Download,
}

/// # Errors
/// `ActionError::Validation` naming the offending field, or
/// `ActionError::MissingFile` with the absolute path of a missing file.
pub async fn validate_options(
    options: &Value,
    kind: HandlerKind,
    snapshot: &ActionSnapshot,
) -> Result<ActionOptions, ActionError> {
    check_raw_shape(options, kind)?;

    let parsed: ActionOptions = serde_json::from_value(options.clone())
        .map_err(|e| ActionError::validation("options", e.to_string()))?;

    check_request(&parsed)?;
    if let Some(response) = &parsed.response {
        check_response(response, kind)?;
    } else if kind == HandlerKind::Download {
        return Err(ActionError::validation("response", "is required for file downloads"));
    }
    check_files(&parsed, snapshot).await?;
    Ok(parsed)
}

/// Checks made on the raw value so the messages name the handler's rule
/// rather than a generic unknown-field error.
fn check_raw_shape(options: &Value, kind: HandlerKind) -> Result<(), ActionError> {
    let Some(object) = options.as_object() else {
        return Err(ActionError::validation("options", "must be an object"));
    };
    let body = object
        .get("request")
        .and_then(|request| request.get("body"))
        .filter(|body| !body.is_null());

    match (kind, body) {
        (HandlerKind::Download, Some(_)) => Err(ActionError::validation(
            "request.body",
            "request.body configuration is not allowed for file download requests",
        )),
        (HandlerKind::Json, Some(body)) => {
            for field in ["upload", "form"] {
                if body.get(field).is_some() {
                    return Err(ActionError::validation(
                        format!("request.body.{field}"),
                        format!("request.body.{field} parameter is not allowed for JSON requests"),
                    ));
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_request(options: &ActionOptions) -> Result<(), ActionError> {
    let request = &options.request;
    if !(request.url.starts_with("http://") || request.url.starts_with("https://")) {
        return Err(ActionError::validation(
            "request.url",
            "must start with http:// or https://",
        ));
    }
    if let Some(timeout) = request.timeout {
        if timeout < 0.0 || Duration::try_from_secs_f64(timeout).is_err() {
            return Err(ActionError::validation(
                "request.timeout",
                "must be a finite number of seconds >= 0",
            ));
        }
    }
    if let Some((name, _)) = request.headers.iter().find(|(_, v)| matches!(v, Scalar::Null)) {
        return Err(ActionError::validation(format!("request.headers.{name}"), SCALAR_ONLY));
    }
    check_no_nulls("request.query", &request.query)?;
    match &request.body {
        Some(RequestBody::UrlencodedForm(fields)) => {
            check_no_nulls("request.body.form.urlencoded", fields)?;
        }
        Some(RequestBody::MultipartForm(form)) => {
            check_no_nulls("request.body.form.multipart.fields", &form.fields)?;
        }
        _ => {}
    }

    if let Some(RequestBody::MultipartForm(form)) = &request.body {
        let urlencoded = request
            .header("content-type")
            .map(|value| value.to_string().to_ascii_lowercase())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));
        if urlencoded && !form.files.is_empty() {
            return Err(ActionError::validation(
                "request.body.form.multipart.files",
                "files cannot be sent with content-type application/x-www-form-urlencoded",
            ));
        }
    }
    Ok(())
}

/// Query and form values are scalars or lists of scalars, never null.
fn check_no_nulls(prefix: &str, values: &BTreeMap<String, ParamValue>) -> Result<(), ActionError> {
    let has_null = |value: &ParamValue| match value {
        ParamValue::One(scalar) => *scalar == Scalar::Null,
        ParamValue::Many(scalars) => scalars.contains(&Scalar::Null),
    };
    match values.iter().find(|(_, value)| has_null(value)) {
        Some((name, _)) => Err(ActionError::validation(format!("{prefix}.{name}"), SCALAR_ONLY)),
        None => Ok(()),
    }
}

fn check_destinations(
    block: &str,
    assign_to: Option<&Destination>,
    push_to: Option<&Destination>,
) -> Result<(), ActionError> {
    if let Some(destination) = assign_to {
        check_destination(&format!("{block}.assignTo"), destination)?;
    }
    if let Some(destination) = push_to {
        check_destination(&format!("{block}.pushTo"), destination)?;
    }
    Ok(())
}

fn check_response(response: &ResponseSpec, kind: HandlerKind) -> Result<(), ActionError> {
    if let Some(route) = &response.status_code {
        let codes = route.successful.as_deref().unwrap_or_default();
        if let Some(code) = codes.iter().find(|code| !(100..=599).contains(*code)) {
            return Err(ActionError::validation(
                "response.statusCode.successful",
                format!("{code} is not a status code between 100 and 599"),
            ));
        }
        if route.successful.is_none() && route.assign_to.is_none() && route.push_to.is_none() {
            return Err(ActionError::validation(
                "response.statusCode",
                "must contain at least one of successful, assignTo, pushTo",
            ));
        }
        check_destinations(
            "response.statusCode",
            route.assign_to.as_ref(),
            route.push_to.as_ref(),
        )?;
    }

    if let Some(route) = &response.headers {
        if route.assign_to.is_none() && route.push_to.is_none() {
            return Err(ActionError::validation(
                "response.headers",
                "must contain at least one of assignTo, pushTo",
            ));
        }
        check_destinations("response.headers", route.assign_to.as_ref(), route.push_to.as_ref())?;
    }

    match &response.body {
        Some(route) => {
            if !route.wants_content() && route.save_to.is_none() {
                return Err(ActionError::validation(
                    "response.body",
                    "must contain at least one of assignTo, pushTo, saveTo",
                ));
            }
            if route.save_to.as_deref().is_some_and(str::is_empty) {
                return Err(ActionError::validation("response.body.saveTo", "must not be empty"));
            }
            check_destinations("response.body", route.assign_to.as_ref(), route.push_to.as_ref())?;
        }
        None if kind == HandlerKind::Download => {
            return Err(ActionError::validation(
                "response.body",
                "is required for file downloads",
            ));
        }
        None => {}
    }
    Ok(())
}

async fn check_files(options: &ActionOptions, snapshot: &ActionSnapshot) -> Result<(), ActionError> {
    let paths: Vec<&str> = match &options.request.body {
        Some(RequestBody::File(file)) => vec![file.path()],
        Some(RequestBody::MultipartForm(form)) => form.files.values().map(String::as_str).collect(),
        _ => Vec::new(),
    };
    for path in paths {
        let absolute = snapshot.absolute_path(path);
        let exists = tokio::fs::try_exists(&absolute)
            .await
            .map_err(|e| ActionError::io(&absolute, e))?;
        if !exists {
            return Err(ActionError::MissingFile { path: absolute });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixture {
        snapshot: ActionSnapshot,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("present.txt"), "x").unwrap();
            Self {
                snapshot: ActionSnapshot::new("validation", dir.path()),
                _dir: dir,
            }
        }

        async fn check(&self, options: Value, kind: HandlerKind) -> Result<ActionOptions, ActionError> {
            validate_options(&options, kind, &self.snapshot).await
        }
    }

    fn field(err: ActionError) -> String {
        match err {
            ActionError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_object_and_empty_options_are_rejected() {
        let fixture = Fixture::new();
        for options in [json!(null), json!([]), json!("x"), json!({})] {
            assert!(fixture.check(options, HandlerKind::Generic).await.unwrap_err().is_validation());
        }
    }

    #[tokio::test]
    async fn minimal_request_passes_and_is_idempotent() {
        let fixture = Fixture::new();
        let options = json!({ "request": { "method": "GET", "url": "https://example.com" } });
        let first = fixture.check(options.clone(), HandlerKind::Generic).await.unwrap();
        let second = fixture.check(options, HandlerKind::Generic).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn url_must_be_http() {
        let fixture = Fixture::new();
        let err = fixture
            .check(
                json!({ "request": { "method": "GET", "url": "ftp://example.com" } }),
                HandlerKind::Generic,
            )
            .await
            .unwrap_err();
        assert_eq!(field(err), "request.url");
    }

    #[tokio::test]
    async fn negative_timeout_is_rejected() {
        let fixture = Fixture::new();
        let err = fixture
            .check(
                json!({ "request": { "method": "GET", "url": "http://x", "timeout": -1 } }),
                HandlerKind::Generic,
            )
            .await
            .unwrap_err();
        assert_eq!(field(err), "request.timeout");
    }

    #[tokio::test]
    async fn timeout_beyond_duration_range_is_rejected() {
        let fixture = Fixture::new();
        for timeout in [json!(1e20), json!(f64::MAX)] {
            let err = fixture
                .check(
                    json!({ "request": { "method": "GET", "url": "http://x", "timeout": timeout } }),
                    HandlerKind::Generic,
                )
                .await
                .unwrap_err();
            assert_eq!(field(err), "request.timeout");
        }
        fixture
            .check(
                json!({ "request": { "method": "GET", "url": "http://x", "timeout": 86400 } }),
                HandlerKind::Generic,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn null_query_and_form_values_are_rejected() {
        let fixture = Fixture::new();
        let cases = [
            (
                json!({ "method": "GET", "url": "http://x", "query": { "a": null } }),
                "request.query.a",
            ),
            (
                json!({ "method": "GET", "url": "http://x", "query": { "list": ["x", null] } }),
                "request.query.list",
            ),
            (
                json!({
                    "method": "POST",
                    "url": "http://x",
                    "body": { "form": { "urlencoded": { "u": null } } }
                }),
                "request.body.form.urlencoded.u",
            ),
            (
                json!({
                    "method": "POST",
                    "url": "http://x",
                    "body": { "form": { "multipart": { "fields": { "m": null } } } }
                }),
                "request.body.form.multipart.fields.m",
            ),
        ];
        for (request, expected) in cases {
            let err = fixture
                .check(json!({ "request": request }), HandlerKind::Generic)
                .await
                .unwrap_err();
            assert_eq!(field(err), expected);
        }
    }

    #[tokio::test]
    async fn malformed_destinations_are_rejected() {
        let fixture = Fixture::new();
        let cases = [
            (json!({ "statusCode": { "assignTo": "ctx.code" } }), "response.statusCode.assignTo"),
            (json!({ "statusCode": { "pushTo": {} } }), "response.statusCode.pushTo"),
            (json!({ "headers": { "assignTo": { "ctx": "code" } } }), "response.headers.assignTo"),
            (json!({ "body": { "pushTo": "$.unknown.body" } }), "response.body.pushTo"),
        ];
        for (response, expected) in cases {
            let err = fixture
                .check(
                    json!({ "request": { "method": "GET", "url": "http://x" }, "response": response }),
                    HandlerKind::Generic,
                )
                .await
                .unwrap_err();
            assert_eq!(field(err), expected);
        }
    }

    #[tokio::test]
    async fn null_header_is_rejected() {
        let fixture = Fixture::new();
        let err = fixture
            .check(
                json!({ "request": { "method": "GET", "url": "http://x", "headers": { "a": null } } }),
                HandlerKind::Generic,
            )
            .await
            .unwrap_err();
        assert_eq!(field(err), "request.headers.a");
    }

    #[tokio::test]
    async fn successful_codes_must_be_in_range() {
        let fixture = Fixture::new();
        let err = fixture
            .check(
                json!({
                    "request": { "method": "GET", "url": "http://x" },
                    "response": { "statusCode": { "successful": [200, 600] } }
                }),
                HandlerKind::Generic,
            )
            .await
            .unwrap_err();
        assert_eq!(field(err), "response.statusCode.successful");
    }

    #[tokio::test]
    async fn response_blocks_need_a_destination() {
        let fixture = Fixture::new();
        for response in [
            json!({ "statusCode": {} }),
            json!({ "headers": {} }),
            json!({ "body": {} }),
        ] {
            let result = fixture
                .check(
                    json!({ "request": { "method": "GET", "url": "http://x" }, "response": response }),
                    HandlerKind::Generic,
                )
                .await;
            assert!(result.unwrap_err().is_validation());
        }
    }

    #[tokio::test]
    async fn json_handler_rejects_upload_and_form() {
        let fixture = Fixture::new();
        let err = fixture
            .check(
                json!({ "request": { "method": "POST", "url": "http://x", "body": { "upload": "a" } } }),
                HandlerKind::Json,
            )
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("request.body.upload parameter is not allowed for JSON requests"));

        let err = fixture
            .check(
                json!({
                    "request": {
                        "method": "POST",
                        "url": "http://x",
                        "body": { "form": { "urlencoded": { "a": 1 } } }
                    }
                }),
                HandlerKind::Json,
            )
            .await
            .unwrap_err();
        assert_eq!(field(err), "request.body.form");
    }

    #[tokio::test]
    async fn generic_handler_rejects_upload_as_unknown() {
        let fixture = Fixture::new();
        let err = fixture
            .check(
                json!({ "request": { "method": "POST", "url": "http://x", "body": { "upload": "a" } } }),
                HandlerKind::Generic,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("upload"));
    }

    #[tokio::test]
    async fn download_rules() {
        let fixture = Fixture::new();
        let with_body = json!({
            "request": { "method": "GET", "url": "http://x", "body": { "inline": 1 } },
            "response": { "body": { "saveTo": "a.bin" } }
        });
        assert_eq!(
            field(fixture.check(with_body, HandlerKind::Download).await.unwrap_err()),
            "request.body"
        );

        let without_response = json!({ "request": { "method": "GET", "url": "http://x" } });
        assert_eq!(
            field(fixture.check(without_response, HandlerKind::Download).await.unwrap_err()),
            "response"
        );

        let without_body_route = json!({
            "request": { "method": "GET", "url": "http://x" },
            "response": { "statusCode": { "assignTo": "$.ctx.code" } }
        });
        assert_eq!(
            field(fixture.check(without_body_route, HandlerKind::Download).await.unwrap_err()),
            "response.body"
        );

        let valid = json!({
            "request": { "method": "GET", "url": "http://x" },
            "response": { "body": { "assignTo": { "ctx": "$.content", "encoding": "utf8" } } }
        });
        fixture.check(valid, HandlerKind::Download).await.unwrap();
    }

    #[tokio::test]
    async fn missing_body_file_names_absolute_path() {
        let fixture = Fixture::new();
        let err = fixture
            .check(
                json!({
                    "request": { "method": "POST", "url": "http://x", "body": { "file": "missing_file.txt" } }
                }),
                HandlerKind::Generic,
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "Unable to locate file at path: {}",
                fixture.snapshot.wd.join("missing_file.txt").display()
            )
        );
    }

    #[tokio::test]
    async fn multipart_files_are_checked() {
        let fixture = Fixture::new();
        let options = |file: &str| {
            json!({
                "request": {
                    "method": "POST",
                    "url": "http://x",
                    "body": { "form": { "multipart": { "files": { "f": file } } } }
                }
            })
        };
        fixture.check(options("present.txt"), HandlerKind::Generic).await.unwrap();
        let err = fixture
            .check(options("absent.txt"), HandlerKind::Generic)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::MissingFile { .. }));
    }

    #[tokio::test]
    async fn multipart_files_with_urlencoded_content_type_are_rejected() {
        let fixture = Fixture::new();
        let err = fixture
            .check(
                json!({
                    "request": {
                        "method": "POST",
                        "url": "http://x",
                        "headers": { "Content-Type": "application/x-www-form-urlencoded" },
                        "body": { "form": { "multipart": { "files": { "f": "present.txt" } } } }
                    }
                }),
                HandlerKind::Generic,
            )
            .await
            .unwrap_err();
        assert_eq!(field(err), "request.body.form.multipart.files");
    }
}
