use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use async_trait::async_trait;
use avatar_service::config::{
    AppConfig, DefaultImage, EmailConfig, RemoteConfig, StorageConfig, UploadConfig,
};
use avatar_service::services::{
    AvatarProcessor, FileStorage, MailQueue, Mailer, OutgoingMail, RemoteFallbackClient,
    ResolutionCascade, UploadWorkflow,
};
use avatar_service::{handlers, Config, Result};
use image::{DynamicImage, GenericImageView, ImageOutputFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const BOUNDARY: &str = "----avatar-test-boundary";

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .unwrap();
    buf
}

fn multipart_body(email: &str, image: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"email\"\r\n\r\n{email}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"me.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(image);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(email: &str, image: &[u8]) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/upload")
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(multipart_body(email, image))
}

fn test_config(data_dir: &std::path::Path, email_domains: Vec<String>) -> Config {
    Config {
        app: AppConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            public_url: "http://avatars.test/".into(),
            default_size: 80,
        },
        storage: StorageConfig {
            data_dir: data_dir.to_path_buf(),
        },
        remote: RemoteConfig::default(),
        upload: UploadConfig {
            email_domains,
            ..UploadConfig::default()
        },
        email: EmailConfig::default(),
    }
}

struct Harness {
    _dir: TempDir,
    root: std::path::PathBuf,
    config: web::Data<Config>,
    cascade: web::Data<ResolutionCascade>,
    workflow: web::Data<UploadWorkflow>,
}

async fn harness(mail_queue: Option<MailQueue>, email_domains: Vec<String>) -> Harness {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(FileStorage::new(dir.path()));
    storage
        .ensure_dirs(&["avatars", "unconfirmed"])
        .await
        .unwrap();
    let processor = Arc::new(AvatarProcessor::with_defaults());
    let config = test_config(dir.path(), email_domains);

    let cascade = ResolutionCascade::new(
        storage.clone(),
        processor.clone(),
        RemoteFallbackClient::new(Vec::new(), Duration::from_secs(1)).unwrap(),
        DefaultImage::RemoteFallback,
    );
    let workflow = UploadWorkflow::new(
        storage,
        processor,
        mail_queue,
        config.upload.clone(),
        config.app.public_url.clone(),
    );

    Harness {
        root: dir.path().to_path_buf(),
        _dir: dir,
        config: web::Data::new(config),
        cascade: web::Data::new(cascade),
        workflow: web::Data::new(workflow),
    }
}

macro_rules! init_app {
    ($harness:expr) => {
        test::init_service(
            App::new()
                .app_data($harness.config.clone())
                .app_data($harness.cascade.clone())
                .app_data($harness.workflow.clone())
                .configure(handlers::configure),
        )
        .await
    };
}

fn file_names(dir: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

async fn wait_for_mail(mailer: &RecordingMailer) -> OutgoingMail {
    for _ in 0..100 {
        if let Some(mail) = mailer.sent.lock().unwrap().first().cloned() {
            return mail;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("confirmation mail was never sent");
}

#[actix_web::test]
async fn test_upload_without_mail_relay_publishes_immediately() {
    let harness = harness(None, Vec::new()).await;
    let app = init_app!(harness);

    let resp = test::call_service(&app, upload_request("A@Foo.com", &png(300, 200)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    assert!(String::from_utf8_lossy(&body).contains("Thank you for uploading your avatar"));

    let hash = format!("{:x}", md5::compute("a@foo.com"));
    let stored = std::fs::read(harness.root.join("avatars").join(&hash)).unwrap();
    assert_eq!(image::load_from_memory(&stored).unwrap().dimensions(), (200, 200));
    assert!(file_names(&harness.root.join("unconfirmed")).is_empty());

    let req = test::TestRequest::get()
        .uri(&format!("/avatar/{hash}?s=64"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(
        resp.headers().get(header::CACHE_CONTROL).unwrap(),
        "max-age=300"
    );
    assert!(resp.headers().contains_key(header::LAST_MODIFIED));
    let body = test::read_body(resp).await;
    assert_eq!(image::load_from_memory(&body).unwrap().dimensions(), (64, 64));
}

#[actix_web::test]
async fn test_upload_with_confirmation_mail() {
    let mailer = Arc::new(RecordingMailer::default());
    let (queue, _worker) = MailQueue::spawn(mailer.clone(), 8);
    let harness = harness(Some(queue), vec!["foo.com".into()]).await;
    let app = init_app!(harness);

    let resp = test::call_service(&app, upload_request("me@foo.com", &png(64, 64)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    assert!(String::from_utf8_lossy(&body).contains("me@foo.com"));

    let hash = format!("{:x}", md5::compute("me@foo.com"));
    let staged = file_names(&harness.root.join("unconfirmed"));
    assert_eq!(staged.len(), 1);
    assert!(staged[0].ends_with(&format!("-{hash}")));
    assert!(!harness.root.join("avatars").join(&hash).exists());

    let mail = wait_for_mail(&mailer).await;
    assert_eq!(mail.recipient, "me@foo.com");
    let token = mail
        .text_body
        .split("http://avatars.test/confirm/")
        .nth(1)
        .unwrap()
        .trim()
        .to_string();
    assert!(staged[0].starts_with(&format!("{token}-")));

    let req = test::TestRequest::get()
        .uri(&format!("/confirm/{token}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(harness.root.join("avatars").join(&hash).exists());
    assert!(file_names(&harness.root.join("unconfirmed")).is_empty());

    // A token can only be used once
    let req = test::TestRequest::get()
        .uri(&format!("/confirm/{token}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_upload_rejects_foreign_domain() {
    let harness = harness(None, vec!["foo.com".into()]).await;
    let app = init_app!(harness);

    let resp = test::call_service(&app, upload_request("me@bar.com", &png(32, 32)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = test::read_body(resp).await;
    assert!(String::from_utf8_lossy(&body).contains("Please use a valid email"));
    assert!(file_names(&harness.root.join("avatars")).is_empty());
}

#[actix_web::test]
async fn test_upload_rejects_non_image() {
    let harness = harness(None, Vec::new()).await;
    let app = init_app!(harness);

    let resp = test::call_service(&app, upload_request("me@foo.com", b"plain text").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = test::read_body(resp).await;
    assert!(String::from_utf8_lossy(&body).contains("only jpeg, png and gif"));
}

#[actix_web::test]
async fn test_avatar_defaults_and_strict_lookup() {
    let harness = harness(None, Vec::new()).await;
    let app = init_app!(harness);
    let hash = "0bc83cb571cd1c50ba6f3e8a78ef1346";

    let req = test::TestRequest::get()
        .uri(&format!("/avatar/{hash}?s=32"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    assert_eq!(image::load_from_memory(&body).unwrap().dimensions(), (32, 32));

    let req = test::TestRequest::get()
        .uri(&format!("/avatar/{hash}?d=404"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get()
        .uri(&format!("/avatar/{hash}.jpg?s=2000"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/jpeg"
    );
    let body = test::read_body(resp).await;
    assert_eq!(image::load_from_memory(&body).unwrap().dimensions(), (512, 512));

    let req = test::TestRequest::get()
        .uri(&format!("/avatar/{hash}.webp"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_confirm_unknown_token() {
    let harness = harness(None, Vec::new()).await;
    let app = init_app!(harness);

    let req = test::TestRequest::get()
        .uri("/confirm/deadbeef")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = test::read_body(resp).await;
    assert!(String::from_utf8_lossy(&body).contains("Error confirming upload"));
}

#[actix_web::test]
async fn test_health_and_pages() {
    let harness = harness(None, Vec::new()).await;
    let app = init_app!(harness);

    for uri in ["/", "/upload", "/api/v1/health", "/api/v1/health/live"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK, "{uri}");
    }
}
