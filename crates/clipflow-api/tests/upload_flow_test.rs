mod helpers;

use helpers::{chunk_form, new_owner, setup_test_app, wait_for_assembly, wait_for_video_ready};
use serde_json::json;
use uuid::Uuid;

use clipflow_bus::WorkBus;
use clipflow_core::deterministic_video_id;
use clipflow_storage::BlobStore;

const MIB: usize = 1_048_576;

fn test_file(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn init_session(
    server: &axum_test::TestServer,
    owner: &str,
    file_size: usize,
    chunk_size: usize,
) -> (Uuid, u32) {
    let response = server
        .post("/upload/initialize")
        .add_header("x-user-id", owner)
        .json(&json!({
            "filename": "movie.mp4",
            "fileSize": file_size,
            "chunkSize": chunk_size,
            "metadata": {"title": "Test Movie", "tags": ["test"]}
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    (
        body["sessionId"].as_str().unwrap().parse().unwrap(),
        body["totalChunks"].as_u64().unwrap() as u32,
    )
}

#[tokio::test]
async fn happy_path_uploads_assembles_and_processes() {
    let app = setup_test_app().await;
    let owner = new_owner();
    let file = test_file(2 * MIB + MIB / 2);

    let (session_id, total_chunks) = init_session(&app.server, &owner, file.len(), MIB).await;
    assert_eq!(total_chunks, 3);

    let expected_progress = [33, 67, 100];
    for (i, chunk) in file.chunks(MIB).enumerate() {
        let response = app
            .server
            .post("/upload/chunk")
            .add_header("x-user-id", owner.as_str())
            .multipart(chunk_form(&session_id.to_string(), i as u32, chunk.to_vec()))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "queued");

        // Wait for the async commit, then check reported progress.
        let mut progress = 0;
        for _ in 0..300 {
            let status = app
                .server
                .get(&format!("/upload/status/{}", session_id))
                .add_header("x-user-id", owner.as_str())
                .await;
            if status.status_code() == 404 {
                // Session already consumed by assembly after the last chunk.
                progress = 100;
                break;
            }
            let status_body: serde_json::Value = status.json();
            progress = status_body["progress"].as_u64().unwrap() as u8;
            if progress >= expected_progress[i] {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(progress, expected_progress[i]);
    }

    wait_for_assembly(&app, session_id).await;

    // The assembled blob is byte-identical to the source file.
    let uploads = app.storage.list_prefix("uploads/").await.unwrap();
    assert_eq!(uploads.len(), 1);
    let assembled = app.storage.read(&uploads[0]).await.unwrap();
    assert_eq!(assembled.len(), file.len());
    assert_eq!(assembled, file);

    // No chunk blobs survive a successful assembly.
    assert!(app.storage.list_prefix("chunks/").await.unwrap().is_empty());

    // Post-processing carries the video to ready with a thumbnail.
    let video = wait_for_video_ready(&app, deterministic_video_id(session_id)).await;
    assert_eq!(video.title, "Test Movie");
    assert_eq!(video.duration_s, Some(60.0));
    assert!(app
        .storage
        .exists(video.thumbnail_key.as_deref().unwrap())
        .await
        .unwrap());

    app.shutdown().await;
}

#[tokio::test]
async fn out_of_order_parallel_upload_produces_identical_bytes() {
    let app = setup_test_app().await;
    let owner = new_owner();
    let file = test_file(2 * MIB + MIB / 2);

    let (session_id, _) = init_session(&app.server, &owner, file.len(), MIB).await;

    // Send chunks 2, 0, 1 concurrently.
    let chunks: Vec<Vec<u8>> = file.chunks(MIB).map(|c| c.to_vec()).collect();
    let sid = session_id.to_string();
    let posts = [2u32, 0, 1].map(|index| {
        let server = &app.server;
        let owner = owner.as_str();
        let data = chunks[index as usize].clone();
        let sid = sid.as_str();
        async move {
            server
                .post("/upload/chunk")
                .add_header("x-user-id", owner)
                .multipart(chunk_form(sid, index, data))
                .await
                .assert_status_ok();
        }
    });
    futures::future::join_all(posts).await;

    wait_for_assembly(&app, session_id).await;

    let uploads = app.storage.list_prefix("uploads/").await.unwrap();
    assert_eq!(app.storage.read(&uploads[0]).await.unwrap(), file);

    app.shutdown().await;
}

#[tokio::test]
async fn duplicate_chunk_commits_once_without_error() {
    let app = setup_test_app().await;
    let owner = new_owner();
    let file = test_file(3000);

    let (session_id, _) = init_session(&app.server, &owner, file.len(), 1000).await;

    for _ in 0..2 {
        app.server
            .post("/upload/chunk")
            .add_header("x-user-id", owner.as_str())
            .multipart(chunk_form(&session_id.to_string(), 1, file[1000..2000].to_vec()))
            .await
            .assert_status_ok();
    }

    // Both commits drain; received stays {1}.
    for _ in 0..300 {
        if app.bus.depth(clipflow_core::queues::CHUNK).await.unwrap() == 0
            && app.bus.inflight_count() == 0
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let session = app.manager.get(session_id).await.unwrap().unwrap();
    assert_eq!(session.received.iter().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(session.state, clipflow_core::SessionState::Uploading);

    app.shutdown().await;
}

#[tokio::test]
async fn resume_lists_missing_chunks_and_completion_rejects_resume() {
    let app = setup_test_app().await;
    let owner = new_owner();
    let file = test_file(3000);

    let (session_id, _) = init_session(&app.server, &owner, file.len(), 1000).await;

    app.server
        .post("/upload/chunk")
        .add_header("x-user-id", owner.as_str())
        .multipart(chunk_form(&session_id.to_string(), 1, file[1000..2000].to_vec()))
        .await
        .assert_status_ok();

    // Wait until the commit lands.
    for _ in 0..300 {
        let session = app.manager.get(session_id).await.unwrap().unwrap();
        if !session.received.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let response = app
        .server
        .post(&format!("/upload/resume/{}", session_id))
        .add_header("x-user-id", owner.as_str())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["missingChunks"], json!([0, 2]));

    app.shutdown().await;
}

#[tokio::test]
async fn cancel_discards_session_chunks_and_rejects_late_posts() {
    let app = setup_test_app().await;
    let owner = new_owner();
    let file = test_file(3000);

    let (session_id, _) = init_session(&app.server, &owner, file.len(), 1000).await;

    for i in 0..2u32 {
        app.server
            .post("/upload/chunk")
            .add_header("x-user-id", owner.as_str())
            .multipart(chunk_form(
                &session_id.to_string(),
                i,
                file[i as usize * 1000..(i as usize + 1) * 1000].to_vec(),
            ))
            .await
            .assert_status_ok();
    }
    for _ in 0..300 {
        let session = app.manager.get(session_id).await.unwrap().unwrap();
        if session.received.len() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    app.server
        .delete(&format!("/upload/cancel/{}", session_id))
        .add_header("x-user-id", owner.as_str())
        .await
        .assert_status_ok();

    // Subsequent chunk POST sees no session.
    app.server
        .post("/upload/chunk")
        .add_header("x-user-id", owner.as_str())
        .multipart(chunk_form(&session_id.to_string(), 2, file[2000..].to_vec()))
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);

    // Chunks are gone and no video row was created.
    assert!(app
        .storage
        .list_prefix(&format!("chunks/{}_chunk_", session_id))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(app.videos.len(), 0);

    app.shutdown().await;
}

#[tokio::test]
async fn foreign_sessions_are_forbidden() {
    let app = setup_test_app().await;
    let owner = new_owner();
    let (session_id, _) = init_session(&app.server, &owner, 3000, 1000).await;

    let response = app
        .server
        .post("/upload/chunk")
        .add_header("x-user-id", new_owner().as_str())
        .multipart(chunk_form(&session_id.to_string(), 0, vec![0u8; 1000]))
        .await;
    response.assert_status(axum::http::StatusCode::FORBIDDEN);

    app.shutdown().await;
}

#[tokio::test]
async fn oversized_declared_file_is_rejected() {
    let app = setup_test_app().await;
    let response = app
        .server
        .post("/upload/initialize")
        .add_header("x-user-id", new_owner().as_str())
        .json(&json!({
            "filename": "huge.mp4",
            "fileSize": 6_u64 * 1024 * 1024 * 1024,
            "chunkSize": 1_048_576,
        }))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);

    app.shutdown().await;
}

#[tokio::test]
async fn missing_caller_is_unauthorized() {
    let app = setup_test_app().await;
    let response = app
        .server
        .get("/upload/sessions")
        .await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);

    app.shutdown().await;
}

#[tokio::test]
async fn session_listing_is_owner_scoped_and_paginated() {
    let app = setup_test_app().await;
    let owner = new_owner();
    for _ in 0..3 {
        init_session(&app.server, &owner, 3000, 1000).await;
    }
    init_session(&app.server, &new_owner(), 3000, 1000).await;

    let response = app
        .server
        .get("/upload/sessions")
        .add_query_param("page", "1")
        .add_query_param("limit", "2")
        .add_header("x-user-id", owner.as_str())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["sessions"].as_array().unwrap().len(), 2);
    assert_eq!(body["page"], 1);
    assert_eq!(body["limit"], 2);

    app.shutdown().await;
}
