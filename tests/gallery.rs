mod common;

use common::{png, FeedServer, Reply};
use feed_import::config::{ColorConfig, ImageConfig};
use feed_import::fetch::build_client;
use feed_import::gallery::{GalleryResolver, ImageError};
use std::sync::Arc;
use std::time::Duration;

fn resolver() -> GalleryResolver {
    let client = build_client(Duration::from_secs(5), 0).unwrap();
    GalleryResolver::new(
        client,
        Arc::new(ImageConfig::default()),
        Arc::new(ColorConfig::default()),
    )
}

#[tokio::test]
async fn small_image_is_kept_only_when_alone() {
    let server = FeedServer::start().await;
    server
        .route("/img/small.png", vec![Reply::ok("image/png", png(100, 100, &[0, 120, 240]))])
        .route(
            "/img/large.png",
            vec![Reply::ok("image/png", png(640, 640, &[0, 80, 160, 240]))],
        );
    let (small, large) = (server.url("/img/small.png"), server.url("/img/large.png"));
    let mut resolver = resolver();

    let gallery = resolver.resolve(&[small.clone()], 0).await;
    assert_eq!(vec![small.clone()], gallery.images);

    let gallery = resolver.resolve(&[small.clone(), large.clone()], 0).await;
    assert_eq!(vec![large], gallery.images);
    assert_eq!(1, gallery.signatures().len());
    assert_eq!(1, server.hits("/img/small.png"));
}

#[tokio::test]
async fn rejects_non_images_and_keeps_unreachable_ones() {
    let server = FeedServer::start().await;
    server.route(
        "/img/broken.jpg",
        vec![Reply::ok("text/html", "<html>nothing here</html>")],
    );
    let (broken, gone) = (server.url("/img/broken.jpg"), server.url("/img/gone.jpg"));
    let mut resolver = resolver();

    let gallery = resolver.resolve(&[broken, gone.clone()], 0).await;
    assert_eq!(vec![gone], gallery.images);
    assert_eq!(1, gallery.rejected.len());
    assert!(matches!(gallery.rejected[0], ImageError::NotAnImage(_)));
}

#[tokio::test]
async fn expands_pages_within_budget() {
    let server = FeedServer::start().await;
    let page = r#"<html><head><meta property="og:image" content="/img/a.png"></head>
        <body><img src="/img/logo.png"><img data-src="/img/b.png"></body></html>"#;
    let photo = png(640, 640, &[0, 80, 160, 240]);
    server
        .route("/item/1", vec![Reply::ok("text/html", page)])
        .route("/img/a.png", vec![Reply::ok("image/png", photo.clone())])
        .route("/img/b.png", vec![Reply::ok("image/png", photo)]);
    let mut resolver = resolver();
    let before = resolver.remaining_expansions();

    let candidates = resolver.candidates(&[server.url("/item/1")]).await;
    assert_eq!(vec![server.url("/img/a.png"), server.url("/img/b.png")], candidates);
    assert_eq!(before - 1, resolver.remaining_expansions());

    // expansions are cached for the run
    resolver.candidates(&[server.url("/item/1")]).await;
    assert_eq!(before - 1, resolver.remaining_expansions());
    assert_eq!(1, server.hits("/item/1"));
}
