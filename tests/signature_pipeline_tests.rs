use inkpage::pixels::{PixelBuffer, PixelFormat};
use inkpage::signature::{
    InkBounds, MAX_SENSITIVITY, SignatureExtractor, SignatureStore, crop_padded, extract,
    find_ink_bounds, is_background, scale,
};
use tempfile::TempDir;

fn photo_with_block(size: u32, block_at: u32, block: u32) -> PixelBuffer {
    let mut photo = PixelBuffer::filled(size, size, PixelFormat::Rgb8, [255, 255, 255, 255]);
    for y in block_at..block_at + block {
        for x in block_at..block_at + block {
            photo.set_pixel(x, y, [0, 0, 0, 255]);
        }
    }
    photo
}

#[test]
fn test_blank_paper_becomes_fully_transparent() {
    let paper = PixelBuffer::filled(64, 48, PixelFormat::Rgb8, [240, 238, 236, 255]);

    for sensitivity in [0, 50, 100] {
        let result = extract(&paper, sensitivity);
        assert_eq!(result.dimensions(), (64, 48));
        assert_eq!(result.format(), PixelFormat::Rgba8);
        assert!(
            result.data().chunks_exact(4).all(|px| px[3] == 0),
            "sensitivity {sensitivity} left ink on blank paper"
        );
    }
}

#[test]
fn test_higher_sensitivity_never_restores_background() {
    let extractor = SignatureExtractor::default();

    for s in 0..MAX_SENSITIVITY {
        let lower = extractor.threshold_for(s);
        let higher = extractor.threshold_for(s + 1);
        assert!(higher < lower);

        for level in 0..=255u8 {
            let l = f32::from(level);
            if is_background(l, lower) {
                assert!(is_background(l, higher), "L={level} flipped to ink at s={}", s + 1);
            }
        }
    }
}

#[test]
fn test_crop_pads_block_by_twenty() {
    let mut buffer = PixelBuffer::new(200, 200, PixelFormat::Rgba8);
    for y in 50..60 {
        for x in 50..60 {
            buffer.set_pixel(x, y, [0, 0, 0, 255]);
        }
    }

    let bounds = find_ink_bounds(&buffer).unwrap();
    assert_eq!(
        bounds,
        InkBounds {
            min_x: 50,
            min_y: 50,
            max_x: 59,
            max_y: 59
        }
    );

    let cropped = crop_padded(&buffer, bounds, 20).unwrap();
    // Origin (30,30), far corner (80,80) exclusive.
    assert_eq!(cropped.dimensions(), (50, 50));
    assert_eq!(cropped.pixel(19, 19), Some([0, 0, 0, 0]));
    assert_eq!(cropped.pixel(20, 20), Some([0, 0, 0, 255]));
    assert_eq!(cropped.pixel(29, 29), Some([0, 0, 0, 255]));
    assert_eq!(cropped.pixel(30, 30), Some([0, 0, 0, 0]));
}

#[test]
fn test_extract_crops_photo_the_same_way() {
    let signature = extract(&photo_with_block(200, 50, 10), 50);
    assert_eq!(signature.dimensions(), (50, 50));
    assert_eq!(signature.pixel(25, 25).map(|px| px[3]), Some(255));
}

#[test]
fn test_crop_clamps_at_the_edges() {
    let signature = extract(&photo_with_block(100, 5, 10), 50);
    // Left and top padding run out at the border: x 0..35, y 0..35.
    assert_eq!(signature.dimensions(), (35, 35));
}

#[test]
fn test_scale_never_upscales() {
    let buffer = PixelBuffer::filled(400, 200, PixelFormat::Rgba8, [0, 0, 0, 255]);
    assert_eq!(scale(&buffer, 800, 400).unwrap().dimensions(), (400, 200));
    assert_eq!(scale(&buffer, 200, 200).unwrap().dimensions(), (200, 100));
}

#[test]
fn test_extracted_signature_survives_the_store() {
    let temp_dir = TempDir::new().unwrap();
    let store = SignatureStore::new(temp_dir.path().join("signatures")).unwrap();

    let signature = extract(&photo_with_block(200, 50, 10), 50);
    let signature = scale(&signature, 40, 40).unwrap();
    assert_eq!(signature.dimensions(), (40, 40));

    let id = store.save(&signature, Some("Initials")).unwrap();
    assert_eq!(store.load(id.as_str()), Some(signature));
    assert_eq!(store.list(), vec![id.clone()]);
    assert!(store.delete(id.as_str()));
    assert!(store.list().is_empty());
}
