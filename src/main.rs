use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use walkdir::WalkDir;

use decor_studio::{
    DesignTable, ImageColumn, ImageUpload, JobRunner, MockGenerator, OutputStatus, PreviewCache,
    PreviewHandle, RegistryEvent, StoreGateway, StoreHandle, StudioConfig, StudioUser,
    SubmissionRegistry,
};

/// Image extensions accepted by the folder import.
const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "gif", "bmp"];

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "decor_studio=info".into()),
        )
        .init();

    let config = StudioConfig::from_env();
    let gateway = StoreGateway::open_default(&config);
    let handle = StoreHandle::new(gateway);
    // If this fails, we panic because the app cannot function without its database
    handle
        .init()
        .await
        .expect("Failed to initialize the studio database. Check permissions and disk space.");

    let registry = Arc::new(SubmissionRegistry::new(handle.clone()));
    registry
        .load()
        .await
        .expect("Failed to load submissions from the studio database.");

    let user = StudioUser::new("local-user", "Studio Guest");
    let table = Arc::new(DesignTable::new(handle.clone(), user, config.table_rows));
    table
        .load_or_seed()
        .await
        .expect("Failed to prepare the staging table.");

    println!(
        "🏠 Decor Studio ready: {} staged rows, {} submissions on file",
        table.rows().len(),
        registry.snapshot().len()
    );
    if let Ok(Some(last)) = handle.get_pref("last_submitted_row").await {
        println!("🕘 Last session submitted row {}", last);
    }

    // Optional: import images from a folder given on the command line.
    if let Some(folder) = std::env::args().nth(1) {
        let imported = import_folder(&table, PathBuf::from(folder)).await;
        println!("✅ Import complete: {} images staged", imported);
    }

    // Stage placeholders into row 1 when nothing is ready to submit yet,
    // so a bare run still exercises the whole flow.
    if !table.rows().iter().any(|r| r.is_eligible()) {
        stage_placeholders(&table).await;
    }

    let previews = render_previews(&handle, &table).await;
    if !previews.is_empty() {
        println!("🖼️  {} previews cached (released on exit)", previews.len());
    }

    let generator = Arc::new(MockGenerator::new(config.generation_delay));
    let runner = JobRunner::new(Arc::clone(&registry), Arc::clone(&table), generator);

    let mut events = registry.subscribe();
    let mut jobs = Vec::new();
    for row in table.rows() {
        if row.is_eligible() && registry.row_status(row.id) == OutputStatus::Idle {
            match table.submit(row.id, &registry).await {
                Ok(submission) => {
                    println!("🚀 Row {} submitted as {}", row.id, submission.id);
                    let _ = handle
                        .set_pref("last_submitted_row", &row.id.to_string())
                        .await;
                    jobs.push(runner.spawn(submission.id));
                }
                Err(err) => eprintln!("⚠️  Row {} submit failed: {err}", row.id),
            }
        }
    }

    if jobs.is_empty() {
        println!("💤 Nothing to generate.");
    } else {
        println!("⏳ Generating {} designs...", jobs.len());
        for job in jobs {
            let _ = job.await;
        }
    }

    while let Ok(event) = events.try_recv() {
        match event {
            RegistryEvent::Loaded { count } => println!("   • loaded {} submissions", count),
            RegistryEvent::Added(s) => println!("   • {} added for row {}", s.id, s.row_id),
            RegistryEvent::Updated(s) => println!("   • {} → {}", s.id, s.status.as_str()),
            RegistryEvent::Deleted { id } => println!("   • {} deleted", id),
        }
    }

    let stats = table.stats();
    println!(
        "📊 {} inspiration images, {} area images, {} generated designs",
        stats.inspiration_images, stats.area_images, stats.generated_outputs
    );
    for submission in registry.snapshot() {
        println!(
            "   row {:>2} → {:<11} {}",
            submission.row_id,
            submission.status.as_str(),
            submission.result_image.as_deref().unwrap_or("-")
        );
    }
}

/// Walk a folder and stage every readable image, pairing files into rows:
/// even files land in the inspiration column, odd files in the area column.
async fn import_folder(table: &DesignTable, folder: PathBuf) -> usize {
    println!("🔍 Scanning folder: {}", folder.display());
    let mut staged = 0;
    let row_count = table.rows().len().max(1) as u32;

    for entry in WalkDir::new(&folder)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        // Only accept known image extensions.
        match path.extension() {
            Some(extension) => {
                let ext = extension.to_string_lossy().to_lowercase();
                if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                    continue;
                }
            }
            None => continue,
        }

        let filename = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("⚠️  Error reading {}: {:?}", filename, e);
                continue;
            }
        };

        let row_id = (staged as u32 / 2) % row_count + 1;
        let column = if staged % 2 == 0 {
            ImageColumn::Inspiration
        } else {
            ImageColumn::Area
        };
        match table
            .add_images(row_id, column, vec![ImageUpload { filename: filename.clone(), bytes }])
            .await
        {
            Ok(_) => {
                staged += 1;
                if staged % 20 == 0 {
                    println!("⏳ Staged {} images...", staged);
                }
            }
            Err(e) => eprintln!("⚠️  Error staging {}: {}", filename, e),
        }
    }
    staged
}

/// Put two generated placeholder images into row 1 so the demo always has
/// something to submit.
async fn stage_placeholders(table: &DesignTable) {
    let uploads = vec![
        ("inspiration-1.png", placeholder_png(210)),
        ("inspiration-2.png", placeholder_png(160)),
    ];
    for (name, bytes) in uploads {
        if let Err(e) = table
            .add_images(
                1,
                ImageColumn::Inspiration,
                vec![ImageUpload { filename: name.into(), bytes }],
            )
            .await
        {
            eprintln!("⚠️  Error staging {}: {}", name, e);
        }
    }
    if let Err(e) = table
        .add_images(
            1,
            ImageColumn::Area,
            vec![ImageUpload {
                filename: "living-room.png".into(),
                bytes: placeholder_png(90),
            }],
        )
        .await
    {
        eprintln!("⚠️  Error staging living-room.png: {}", e);
    }
    println!("🪄 Staged placeholder images into row 1");
}

/// Render previews for every staged image; the handles keep the cached
/// files alive until the program exits.
async fn render_previews(handle: &StoreHandle, table: &DesignTable) -> Vec<PreviewHandle> {
    let cache = match PreviewCache::open_default() {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("⚠️  Preview cache unavailable: {}", e);
            return Vec::new();
        }
    };

    let mut previews = Vec::new();
    for row in table.rows() {
        for image in row.inspiration_images.iter().chain(&row.area_images) {
            let bytes = match handle.get_blob(&image.id).await {
                Ok(Some(bytes)) => bytes,
                _ => continue,
            };
            match cache.render(&image.id, &bytes) {
                Ok(preview) => previews.push(preview),
                Err(e) => eprintln!("⚠️  Preview for {} failed: {}", image.name, e),
            }
        }
    }
    previews
}

/// A small uniform PNG used when no real files are supplied.
fn placeholder_png(shade: u8) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(64, 48, image::Rgb([shade, shade, shade]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .expect("encode placeholder");
    buf.into_inner()
}
