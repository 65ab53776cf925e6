//! Integration tests for the studio core: the full staging-to-generation
//! flow over a real database file.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use decor_studio::{
    DesignGenerator, DesignTable, GeneratedDesign, GenerationError, GenerationRequest,
    ImageColumn, ImageUpload, JobRunner, MockGenerator, OutputStatus, StoreError, StoreGateway,
    StoreHandle, StudioUser, SubmissionRegistry, SubmissionStatus,
};
use tempfile::TempDir;

fn png_upload(name: &str, shade: u8) -> ImageUpload {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([shade, shade, shade]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .expect("Failed to encode test image");
    ImageUpload {
        filename: name.to_string(),
        bytes: buf.into_inner(),
    }
}

async fn open_studio(dir: &TempDir) -> (StoreHandle, Arc<SubmissionRegistry>, Arc<DesignTable>) {
    let handle = StoreHandle::new(StoreGateway::at_path(dir.path().join("studio.db")));
    handle.init().await.expect("Failed to initialize database");

    let registry = Arc::new(SubmissionRegistry::new(handle.clone()));
    registry.load().await.expect("Failed to load registry");

    let table = Arc::new(DesignTable::new(
        handle.clone(),
        StudioUser::new("user-1", "Sam"),
        15,
    ));
    table.load_or_seed().await.expect("Failed to seed table");
    (handle, registry, table)
}

#[tokio::test]
async fn test_full_flow_from_upload_to_generated_design() {
    let dir = TempDir::new().unwrap();
    let (handle, registry, table) = open_studio(&dir).await;

    assert_eq!(table.rows().len(), 15);
    assert!(registry.snapshot().is_empty());

    // Stage a row.
    table
        .add_images(
            4,
            ImageColumn::Inspiration,
            vec![png_upload("scandi.png", 200), png_upload("loft.png", 150)],
        )
        .await
        .unwrap();
    table
        .add_images(4, ImageColumn::Area, vec![png_upload("my-room.png", 90)])
        .await
        .unwrap();
    assert!(table.is_eligible(4));
    assert_eq!(registry.row_status(4), OutputStatus::Idle);

    // Submit and generate.
    let submission = table.submit(4, &registry).await.unwrap();
    assert_eq!(submission.status, SubmissionStatus::Pending);
    assert_eq!(registry.row_status(4), OutputStatus::Generating);

    let generator = Arc::new(
        MockGenerator::new(Duration::from_millis(5))
            .with_outputs(vec!["https://example.test/design.jpg".into()]),
    );
    let runner = JobRunner::new(Arc::clone(&registry), Arc::clone(&table), generator);
    runner.spawn(submission.id.clone()).await.unwrap();

    // Terminal state everywhere: registry, projection, row mirror, store.
    let done = registry.find(&submission.id).unwrap();
    assert_eq!(done.status, SubmissionStatus::Completed);
    assert_eq!(registry.row_status(4), OutputStatus::Completed);

    let row = table.row(4).unwrap();
    assert_eq!(row.output_status, OutputStatus::Completed);
    assert_eq!(
        row.output_image.as_deref(),
        Some("https://example.test/design.jpg")
    );

    let mirrored = handle.images_by_submission(&submission.id).await.unwrap();
    assert_eq!(mirrored.len(), 3);
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let submission_id;
    {
        let (handle, registry, table) = open_studio(&dir).await;
        table
            .add_images(2, ImageColumn::Inspiration, vec![png_upload("a.png", 10)])
            .await
            .unwrap();
        table
            .add_images(2, ImageColumn::Area, vec![png_upload("b.png", 20)])
            .await
            .unwrap();
        submission_id = table.submit(2, &registry).await.unwrap().id;
        handle.close();
    }

    // A fresh session over the same file sees everything.
    let (handle, registry, table) = open_studio(&dir).await;
    assert_eq!(registry.snapshot().len(), 1);
    assert_eq!(registry.snapshot()[0].id, submission_id);
    assert_eq!(registry.row_status(2), OutputStatus::Generating);

    let row = table.row(2).unwrap();
    assert_eq!(row.inspiration_images.len(), 1);
    assert_eq!(row.area_images.len(), 1);

    // Blobs came back too.
    let image_id = &row.inspiration_images[0].id;
    assert!(handle.get_blob(image_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_failed_generation_is_visible_and_retryable() {
    struct FlakyBackend;

    #[async_trait]
    impl DesignGenerator for FlakyBackend {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GeneratedDesign, GenerationError> {
            Err(GenerationError::new("quota exhausted"))
        }
    }

    let dir = TempDir::new().unwrap();
    let (_handle, registry, table) = open_studio(&dir).await;
    table
        .add_images(1, ImageColumn::Inspiration, vec![png_upload("a.png", 10)])
        .await
        .unwrap();
    table
        .add_images(1, ImageColumn::Area, vec![png_upload("b.png", 20)])
        .await
        .unwrap();

    let failed_submission = table.submit(1, &registry).await.unwrap();
    let runner = JobRunner::new(
        Arc::clone(&registry),
        Arc::clone(&table),
        Arc::new(FlakyBackend),
    );
    runner.process(&failed_submission.id).await.unwrap();

    assert_eq!(registry.row_status(1), OutputStatus::Error);
    assert_eq!(table.row(1).unwrap().output_status, OutputStatus::Error);

    // The row is still eligible, so the user can submit again; the newer
    // submission drives the projection from now on.
    let retry = table.submit(1, &registry).await.unwrap();
    assert_ne!(retry.id, failed_submission.id);
    assert_eq!(registry.row_status(1), OutputStatus::Generating);

    let runner = JobRunner::new(
        Arc::clone(&registry),
        Arc::clone(&table),
        Arc::new(MockGenerator::new(Duration::from_millis(1))),
    );
    runner.process(&retry.id).await.unwrap();
    assert_eq!(registry.row_status(1), OutputStatus::Completed);
}

#[tokio::test]
async fn test_unsupported_host_degrades_without_panicking() {
    let handle = StoreHandle::new(StoreGateway::unavailable());
    let err = handle.init().await.unwrap_err();
    assert_eq!(err, StoreError::UnsupportedEnvironment);

    let registry = SubmissionRegistry::new(handle.clone());
    registry.load().await.expect("load settles quietly");
    assert!(!registry.is_loading());
    assert!(registry.snapshot().is_empty());

    // Durable calls keep failing fast with the same descriptive error.
    let table = DesignTable::new(handle.clone(), StudioUser::new("user-1", "Sam"), 15);
    let err = table.load_or_seed().await.unwrap_err();
    assert_eq!(err, StoreError::UnsupportedEnvironment);
    assert_eq!(handle.last_error(), Some(StoreError::UnsupportedEnvironment));
}

#[tokio::test]
async fn test_retry_initialization_recovers_a_session() {
    let dir = TempDir::new().unwrap();
    let (handle, registry, _table) = open_studio(&dir).await;
    registry
        .add_submission(decor_studio::SubmissionDraft {
            user_id: "user-1".into(),
            user_name: "Sam".into(),
            row_id: 7,
            inspiration_images: Vec::new(),
            area_images: Vec::new(),
            priority: None,
        })
        .await
        .unwrap();

    // Connection drops out from under the session.
    handle.close();
    assert!(!handle.is_initialized());

    registry
        .retry_initialization()
        .await
        .expect("retry reopens and reloads");
    assert!(handle.is_initialized());
    assert_eq!(registry.snapshot().len(), 1);
    assert_eq!(registry.row_status(7), OutputStatus::Generating);
}
