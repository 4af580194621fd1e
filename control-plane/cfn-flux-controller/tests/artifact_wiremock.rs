mod common;

use cfn_flux_controller::artifact::ArtifactError;
use cfn_flux_controller::source::Artifact;
use common::*;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn artifact(url: String, digest: String) -> Artifact {
    Artifact {
        url,
        revision: REVISION.into(),
        digest: Some(digest),
        checksum: None,
    }
}

#[test_log::test(tokio::test)]
async fn template_is_read_from_verified_archive() {
    let server = MockServer::start().await;
    let archive = tarball(&[("stacks/app.yaml", TEMPLATE), ("README.md", "docs")]);
    let digest = format!("sha256:{}", sha256_hex(&archive));
    let url = serve_archive(&server, "ok.tar.gz", archive).await;

    let body = loader(http_config())
        .load_template(&artifact(url, digest), "stacks/app.yaml")
        .await
        .unwrap();
    assert_eq!(body, TEMPLATE);
}

#[test_log::test(tokio::test)]
async fn corrupted_archive_fails_digest_check() {
    let server = MockServer::start().await;
    let archive = tarball(&[("stack.yaml", TEMPLATE)]);
    let digest = format!("sha256:{}", sha256_hex(&archive));
    let mut corrupted = archive.clone();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0x01;
    let url = serve_archive(&server, "bad.tar.gz", corrupted).await;

    let err = loader(http_config())
        .load_template(&artifact(url, digest.clone()), "stack.yaml")
        .await
        .unwrap_err();
    match err {
        ArtifactError::DigestMismatch { expected, actual } => {
            assert_eq!(expected, digest);
            assert_ne!(actual, digest);
            assert!(actual.starts_with("sha256:"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    let archive = tarball(&[("stack.yaml", TEMPLATE)]);
    let digest = format!("sha256:{}", sha256_hex(&archive));
    Mock::given(method("GET"))
        .and(path("/flaky.tar.gz"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .expect(1)
        .mount(&server)
        .await;

    let body = loader(http_config())
        .load_template(
            &artifact(format!("{}/flaky.tar.gz", server.uri()), digest),
            "stack.yaml",
        )
        .await
        .unwrap();
    assert_eq!(body, TEMPLATE);
}

#[test_log::test(tokio::test)]
async fn retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down.tar.gz"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let err = loader(http_config())
        .load_template(
            &artifact(format!("{}/down.tar.gz", server.uri()), "sha256:00".into()),
            "stack.yaml",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ArtifactError::Status { status: 502, .. }));
}

#[test_log::test(tokio::test)]
async fn client_errors_fail_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.tar.gz"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = loader(http_config())
        .load_template(
            &artifact(format!("{}/gone.tar.gz", server.uri()), "sha256:00".into()),
            "stack.yaml",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ArtifactError::Status { status: 404, .. }));
}

#[test_log::test(tokio::test)]
async fn host_override_points_downloads_at_local_port() {
    let server = MockServer::start().await;
    let archive = tarball(&[("stack.yaml", TEMPLATE)]);
    let digest = format!("sha256:{}", sha256_hex(&archive));
    serve_archive(&server, "local.tar.gz", archive).await;

    let mut cfg = http_config();
    cfg.source_controller_localhost = Some(server.address().to_string());
    let in_cluster = format!(
        "http://source-controller.flux-system.svc.cluster.local./gitrepository/{NS}/{SOURCE}/local.tar.gz"
    );
    let body = loader(cfg)
        .load_template(&artifact(in_cluster, digest), "stack.yaml")
        .await
        .unwrap();
    assert_eq!(body, TEMPLATE);
}

#[test_log::test(tokio::test)]
async fn missing_template_in_archive_is_read_error() {
    let server = MockServer::start().await;
    let archive = tarball(&[("other.yaml", TEMPLATE)]);
    let digest = format!("sha256:{}", sha256_hex(&archive));
    let url = serve_archive(&server, "other.tar.gz", archive).await;

    let err = loader(http_config())
        .load_template(&artifact(url, digest), "stack.yaml")
        .await
        .unwrap_err();
    assert!(matches!(err, ArtifactError::Read { .. }));
}
