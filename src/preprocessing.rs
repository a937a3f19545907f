/// Preprocessing functions that turn raw images into the input tensor expected
/// by the MobileNetV2 feature extractor.
/// Training and inference must go through the same functions here; any drift in
/// resizing or normalization silently degrades accuracy without an error.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{imageops, imageops::FilterType, RgbImage};
use log::warn;
use ndarray::Array4;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::error::Result;

pub const IMAGE_INPUT_SIZE: usize = 224;
pub const NUM_CHANNELS: usize = 3;
pub const FEATURE_VECTOR_LENGTH: usize = 1280;

/// NHWC, batch of one. The Keras MobileNetV2 export is channels-last.
pub const INPUT_SHAPE: [usize; 4] = [1, IMAGE_INPUT_SIZE, IMAGE_INPUT_SIZE, NUM_CHANNELS];

/// A `[1, 224, 224, 3]` tensor with values in [-1, 1].
pub type PreprocessedTensor = Array4<f32>;

/// Decodes an encoded image into an upright RGB raster.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage>
{
	let img = image::load_from_memory(bytes)?;
	let mut rgb = img.to_rgb8();
	fix_orientation(&mut rgb, read_orientation(bytes));
	Ok(rgb)
}

pub fn load_image(path: &Path) -> Result<RgbImage>
{
	let bytes = std::fs::read(path)?;
	decode_image(&bytes)
}

pub fn preprocess_bytes(bytes: &[u8]) -> Result<PreprocessedTensor>
{
	let img = decode_image(bytes)?;
	Ok(preprocess_image(&img))
}

pub fn preprocess_file(path: &Path) -> Result<PreprocessedTensor>
{
	let img = load_image(path)?;
	Ok(preprocess_image(&img))
}

/// Resizes to 224x224 (aspect ratio is not kept) and converts to the extractor's input format.
pub fn preprocess_image(img: &RgbImage) -> PreprocessedTensor
{
	let resized = resize_image(img);
	image_to_mobilenet_format(&resized)
}

/// Loads and preprocesses a batch of files in parallel.
/// The output order matches the input order, with one result per path.
pub fn preprocess_batch(paths: &[PathBuf]) -> Vec<(PathBuf, Result<PreprocessedTensor>)>
{
	paths.par_iter().map(
	{
		| path |
		{
			(path.clone(), preprocess_file(path))
		}
	}).collect::<Vec<(PathBuf, Result<PreprocessedTensor>)>>()
}

pub fn resize_image(img: &RgbImage) -> RgbImage
{
	imageops::resize(
		img,
		IMAGE_INPUT_SIZE as u32,
		IMAGE_INPUT_SIZE as u32,
		FilterType::Triangle)
}

/// MobileNetV2 `preprocess_input`: scales [0, 255] to [-1, 1].
pub fn normalize_channel_value(value: u8) -> f32
{
	(value as f32) / 127.5 - 1.0
}

// Expects an already resized image.
fn image_to_mobilenet_format(img: &RgbImage) -> PreprocessedTensor
{
	let mut image_input = Array4::zeros(INPUT_SHAPE);
	for (x, y, pixel) in img.enumerate_pixels()
	{
		let [r, g, b] = pixel.0;
		let (x, y) = (x as usize, y as usize);
		image_input[[0, y, x, 0]] = normalize_channel_value(r);
		image_input[[0, y, x, 1]] = normalize_channel_value(g);
		image_input[[0, y, x, 2]] = normalize_channel_value(b);
	}

	image_input
}

/// Reads the EXIF orientation tag, stored as a value 1-8.
/// If there is no EXIF data or it fails to parse, we assume the image is upright (1).
fn read_orientation(bytes: &[u8]) -> u32
{
	let exifreader = exif::Reader::new();
	let exif = match exifreader.read_from_container(&mut Cursor::new(bytes))
	{
		Ok(exif) => exif,
		Err(_) => return 1,
	};

	// Readers should accept BYTE, SHORT, or LONG values for any unsigned
	// integer field, which `Value::get_uint` handles.
	exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
		.and_then(|orientation| orientation.value.get_uint(0))
		.unwrap_or(1)
}

// 1 = upright, 2 = mirrored, 3 = 180, 4 = 180 mirrored,
// 5 = 90 mirrored, 6 = 90, 7 = 270 mirrored, 8 = 270.
fn fix_orientation(image: &mut RgbImage, orientation: u32)
{
	match orientation
	{
		1 => {},
		2 => imageops::flip_horizontal_in_place(image),
		3 => imageops::rotate180_in_place(image),
		4 => imageops::flip_vertical_in_place(image),
		5 => {
			*image = imageops::rotate90(image);
			imageops::flip_horizontal_in_place(image);
		},
		6 => *image = imageops::rotate90(image),
		7 => {
			*image = imageops::rotate270(image);
			imageops::flip_horizontal_in_place(image);
		},
		8 => *image = imageops::rotate270(image),
		_ => {
			warn!("Unsupported EXIF orientation: {}", orientation);
		}
	}
}

#[cfg(test)]
mod tests
{
	use image::{ImageFormat, Rgb};

	use super::*;
	use crate::error::Error;

	fn encode_png(img: &RgbImage) -> Vec<u8>
	{
		let mut bytes = Cursor::new(Vec::new());
		img.write_to(&mut bytes, ImageFormat::Png).unwrap();
		bytes.into_inner()
	}

	#[test]
	fn tensor_has_expected_shape_and_range()
	{
		let img = RgbImage::from_fn(640, 100, |x, _| Rgb([(x % 256) as u8, 0, 255]));
		let tensor = preprocess_image(&img);
		assert_eq!(tensor.shape(), &INPUT_SHAPE);
		assert!(tensor.iter().all(|v| (-1.0..=1.0).contains(v)));
		// Pure blue channel stays at the top of the range after bilinear resizing.
		assert_eq!(tensor[[0, 10, 10, 2]], 1.0);
		assert_eq!(tensor[[0, 10, 10, 1]], -1.0);
	}

	#[test]
	fn channel_scaling_matches_mobilenet()
	{
		assert_eq!(normalize_channel_value(0), -1.0);
		assert_eq!(normalize_channel_value(255), 1.0);
		approx::assert_abs_diff_eq!(normalize_channel_value(127), -0.003_921_6, epsilon = 1e-6);
	}

	#[test]
	fn channels_stay_in_rgb_order()
	{
		let img = RgbImage::from_pixel(IMAGE_INPUT_SIZE as u32, IMAGE_INPUT_SIZE as u32, Rgb([255, 0, 0]));
		let tensor = preprocess_bytes(&encode_png(&img)).unwrap();
		assert_eq!(tensor[[0, 0, 0, 0]], 1.0);
		assert_eq!(tensor[[0, 0, 0, 2]], -1.0);
	}

	#[test]
	fn garbage_bytes_are_a_decode_error()
	{
		let result = preprocess_bytes(b"\x00\x01not an image at all");
		assert!(matches!(result, Err(Error::Decode(_))));
	}

	#[test]
	fn preprocessing_is_deterministic()
	{
		let img = RgbImage::from_fn(97, 53, |x, y| Rgb([(x * 2) as u8, (y * 3) as u8, (x + y) as u8]));
		let bytes = encode_png(&img);
		let first = preprocess_bytes(&bytes).unwrap();
		let second = preprocess_bytes(&bytes).unwrap();
		assert_eq!(first, second);
	}

	#[test]
	fn orientation_six_rotates_clockwise()
	{
		let mut img = RgbImage::new(4, 2);
		img.put_pixel(0, 0, Rgb([255, 255, 255]));
		fix_orientation(&mut img, 6);
		assert_eq!(img.dimensions(), (2, 4));
		// The top-left pixel ends up in the top-right corner.
		assert_eq!(img.get_pixel(1, 0), &Rgb([255, 255, 255]));
	}

	#[test]
	fn missing_exif_means_upright()
	{
		let img = RgbImage::new(3, 3);
		assert_eq!(read_orientation(&encode_png(&img)), 1);
	}

	#[test]
	fn batch_preserves_order_and_reports_failures()
	{
		let dir = tempfile::tempdir().unwrap();
		let good = dir.path().join("good.png");
		let bad = dir.path().join("bad.png");
		RgbImage::new(8, 8).save(&good).unwrap();
		std::fs::write(&bad, b"corrupt").unwrap();

		let results = preprocess_batch(&[bad.clone(), good.clone()]);
		assert_eq!(results[0].0, bad);
		assert!(results[0].1.is_err());
		assert_eq!(results[1].0, good);
		assert!(results[1].1.is_ok());
	}
}
