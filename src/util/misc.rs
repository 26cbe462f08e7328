//! This module is the general place for utilities that don't need their own module.

use std::{fs, io, io::Read, path::Path};

/// Computes the 32-bit CRC of the file at the provided path.
/// The file is hashed in chunks, so large archives don't get pulled into memory whole.
pub fn file_crc32(path: impl AsRef<Path>) -> io::Result<u32> {
	let mut file = fs::File::open(path)?;
	let mut hasher = crc32fast::Hasher::new();
	let mut buffer = [0u8; 8192];

	loop {
		let count = file.read(&mut buffer)?;
		if count == 0 { break; }

		hasher.update(&buffer[..count]);
	}

	Ok(hasher.finalize())
}
