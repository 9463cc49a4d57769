mod helpers;

use axum::http::StatusCode;
use helpers::setup_test_app;

use clipflow_storage::BlobStore;

const MIB: usize = 1_048_576;

fn test_file(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 239) as u8).collect()
}

#[tokio::test]
async fn full_request_streams_the_whole_blob() {
    let app = setup_test_app().await;
    let file = test_file(4096);
    app.storage.put("uploads/x.mp4", file.clone()).await.unwrap();

    let response = app.server.get("/stream/x.mp4").await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "video/mp4");
    assert_eq!(response.header("accept-ranges"), "bytes");
    assert_eq!(response.as_bytes().to_vec(), file);

    app.shutdown().await;
}

#[tokio::test]
async fn one_mib_window_of_a_ten_mib_file() {
    let app = setup_test_app().await;
    let file = test_file(10 * MIB);
    app.storage.put("uploads/x.mp4", file.clone()).await.unwrap();

    let response = app
        .server
        .get("/stream/x.mp4")
        .add_header("range", "bytes=1048576-2097151")
        .await;

    response.assert_status(StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.header("content-range"),
        "bytes 1048576-2097151/10485760"
    );
    assert_eq!(response.header("content-length"), "1048576");
    let body = response.as_bytes().to_vec();
    assert_eq!(body.len(), MIB);
    assert_eq!(body, file[MIB..2 * MIB].to_vec());

    app.shutdown().await;
}

#[tokio::test]
async fn open_ended_range_runs_to_the_last_byte() {
    let app = setup_test_app().await;
    let file = test_file(1000);
    app.storage.put("uploads/x.mp4", file.clone()).await.unwrap();

    let response = app
        .server
        .get("/stream/x.mp4")
        .add_header("range", "bytes=900-")
        .await;

    response.assert_status(StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.header("content-range"), "bytes 900-999/1000");
    assert_eq!(response.as_bytes().to_vec(), file[900..].to_vec());

    app.shutdown().await;
}

#[tokio::test]
async fn out_of_range_request_is_416() {
    let app = setup_test_app().await;
    app.storage.put("uploads/x.mp4", test_file(1000)).await.unwrap();

    let response = app
        .server
        .get("/stream/x.mp4")
        .add_header("range", "bytes=5000-6000")
        .await;

    response.assert_status(StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.header("content-range"), "bytes */1000");

    app.shutdown().await;
}

#[tokio::test]
async fn missing_blob_is_404() {
    let app = setup_test_app().await;
    let response = app.server.get("/stream/nope.mp4").await;
    response.assert_status(StatusCode::NOT_FOUND);

    app.shutdown().await;
}

#[tokio::test]
async fn traversal_in_filename_is_rejected() {
    let app = setup_test_app().await;
    let response = app.server.get("/stream/..%2F..%2Fetc%2Fpasswd").await;
    assert!(response.status_code().is_client_error());

    app.shutdown().await;
}
