//! Verify the request builder against JSON test vectors stored in `test-vectors/`.
//!
//! Each case gives a request spec, the build mode, and the request the
//! transport should receive. Headers are compared case-insensitively and
//! only for the names listed, so unrelated defaults do not break a case.

use http_actions::builder::{BuildMode, RequestBuilder};
use http_actions::http::RequestPayload;
use http_actions::template::PlaceholderTemplates;
use http_actions::{
    ActionSnapshot, DelegatedParameters, ExecutionContext, RequestSpec, TransportConfig,
};
use serde_json::Value;

fn parse_mode(s: &str) -> BuildMode {
    match s {
        "generic" => BuildMode::Generic,
        "json" => BuildMode::Json,
        other => panic!("unknown mode: {other}"),
    }
}

#[tokio::test]
async fn build_test_vectors() {
    let raw = include_str!("../../test-vectors/build.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    let config = TransportConfig::default();
    let snapshot = ActionSnapshot::new("vectors", ".");
    let context = ExecutionContext::default();
    let parameters = DelegatedParameters::default();
    let builder = RequestBuilder {
        config: &config,
        templates: &PlaceholderTemplates,
        snapshot: &snapshot,
        context: &context,
        parameters: &parameters,
    };

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let spec: RequestSpec = serde_json::from_value(case["request"].clone())
            .unwrap_or_else(|e| panic!("{name}: bad request spec: {e}"));
        let mode = parse_mode(case["mode"].as_str().unwrap());
        let expected = &case["expected"];

        let request = builder.build(&spec, mode).await.unwrap();

        assert_eq!(request.method.as_str(), expected["method"], "{name}: method");
        assert_eq!(request.url, expected["url"].as_str().unwrap(), "{name}: url");

        let query: Vec<(String, String)> =
            serde_json::from_value(expected["query"].clone()).unwrap();
        assert_eq!(request.query, query, "{name}: query");

        for (header, value) in expected["headers"].as_object().unwrap() {
            assert_eq!(
                request.header(header),
                value.as_str(),
                "{name}: header {header}"
            );
        }
        for header in expected["absent_headers"].as_array().unwrap() {
            let header = header.as_str().unwrap();
            assert!(request.header(header).is_none(), "{name}: unexpected {header}");
        }

        match (&request.body, expected["body"].as_str()) {
            (RequestPayload::Empty, None) => {}
            (RequestPayload::Bytes(bytes), Some(text)) => {
                assert_eq!(std::str::from_utf8(bytes).unwrap(), text, "{name}: body");
            }
            (other, want) => panic!("{name}: body {other:?}, expected {want:?}"),
        }

        assert_eq!(
            request.timeout.as_millis(),
            u128::from(expected["timeout_ms"].as_u64().unwrap()),
            "{name}: timeout"
        );
    }
}
