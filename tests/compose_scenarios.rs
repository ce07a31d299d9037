use std::io::Cursor;

use stillreel::{
    BufferSource, CanvasSize, ContentMode, PixelBufferPool, PixelFormat, PoolConfig, SourceImage,
    compose_into, decode_image, placement,
};

fn png_bytes(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(w, h, image::Rgba(rgba));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn alpha_at(buf: &stillreel::PixelBuffer, x: u32, y: u32) -> u8 {
    let [_, _, _, a] = buf.format().channel_offsets();
    buf.row(y)[x as usize * PixelFormat::BYTES_PER_PIXEL + a]
}

#[test]
fn square_photo_letterboxes_into_portrait_canvas() {
    let canvas = CanvasSize::default();
    let image = decode_image(&png_bytes(640, 640, [30, 200, 90, 255])).unwrap();
    let pool = PixelBufferPool::new(canvas, PoolConfig::default()).unwrap();
    let mut buf = pool.acquire_buffer(canvas).unwrap();

    let place = compose_into(&image, canvas, ContentMode::Fit, &mut buf).unwrap();
    assert!((place.ratio - 0.5).abs() < 1e-12);
    assert_eq!((place.offset.x, place.offset.y), (0.0, 124.0));

    for x in [0, 160, 319] {
        assert_eq!(alpha_at(&buf, x, 0), 0);
        assert_eq!(alpha_at(&buf, x, 123), 0);
        assert!(alpha_at(&buf, x, 124) > 250);
        assert!(alpha_at(&buf, x, 443) > 250);
        assert_eq!(alpha_at(&buf, x, 444), 0);
        assert_eq!(alpha_at(&buf, x, 567), 0);
    }
}

#[test]
fn landscape_photo_fills_portrait_canvas() {
    let canvas = CanvasSize::default();
    let place = placement(1280, 720, canvas, ContentMode::Fill);
    assert!((place.scaled.height - 568.0).abs() < 1e-9);
    assert!((place.scaled.width - 1009.777).abs() < 0.01);
    assert_eq!((place.offset.x, place.offset.y), (0.0, 0.0));
    assert!(place.overflows(canvas));

    let image = SourceImage::solid(1280, 720, [200, 10, 10, 255]).unwrap();
    let pool = PixelBufferPool::new(canvas, PoolConfig::default()).unwrap();
    let mut buf = pool.acquire_buffer(canvas).unwrap();
    compose_into(&image, canvas, ContentMode::Fill, &mut buf).unwrap();

    for y in [0, 284, 567] {
        for x in [0, 160, 319] {
            assert!(alpha_at(&buf, x, y) > 250, "hole at ({x}, {y})");
        }
    }
}

#[test]
fn reused_buffers_do_not_leak_previous_frames() {
    let canvas = CanvasSize::new(30, 20).unwrap();
    let pool = PixelBufferPool::new(
        canvas,
        PoolConfig {
            max_outstanding: 1,
            ..PoolConfig::default()
        },
    )
    .unwrap();
    assert!(pool.stride() > canvas.packed_row_bytes());

    let wide = SourceImage::solid(30, 20, [255, 255, 255, 255]).unwrap();
    let mut buf = pool.acquire_buffer(canvas).unwrap();
    compose_into(&wide, canvas, ContentMode::Fit, &mut buf).unwrap();
    drop(buf);

    let tall = SourceImage::solid(10, 20, [255, 255, 255, 255]).unwrap();
    let mut buf = pool.acquire_buffer(canvas).unwrap();
    assert_eq!(pool.stats().reused_buffers, 1);
    compose_into(&tall, canvas, ContentMode::Fit, &mut buf).unwrap();

    assert_eq!(alpha_at(&buf, 0, 10), 0);
    assert!(alpha_at(&buf, 15, 10) > 250);
    assert_eq!(alpha_at(&buf, 29, 10), 0);
}

#[test]
fn translucent_sources_are_premultiplied_in_the_buffer() {
    let canvas = CanvasSize::new(2, 2).unwrap();
    let pool = PixelBufferPool::new(
        canvas,
        PoolConfig {
            format: PixelFormat::Rgba8Premul,
            ..PoolConfig::default()
        },
    )
    .unwrap();
    let image = decode_image(&png_bytes(2, 2, [200, 100, 50, 128])).unwrap();
    let mut buf = pool.acquire_buffer(canvas).unwrap();
    compose_into(&image, canvas, ContentMode::Fit, &mut buf).unwrap();

    let px = &buf.row(0)[0..4];
    assert_eq!(px[3], 128);
    assert!(px[0] <= px[3]);
    assert!((i32::from(px[0]) - 100).abs() <= 1);
}
