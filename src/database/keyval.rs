use luge_core::{Result, err};

/// Separator between the variable-width segments of a composite key.
/// Fixed-width u64 segments lead their keys instead, since big-endian
/// bytes may collide with the separator.
pub const SEPARATOR: u8 = 0xFF;

pub fn u64_from_bytes(bytes: &[u8]) -> Result<u64> {
	let array: [u8; 8] = bytes
		.try_into()
		.map_err(|_e| err!(Database("expected eight bytes of key material")))?;

	Ok(u64::from_be_bytes(array))
}

/// Split the variable-width remainder of a key on the separator.
pub fn split_parts(key: &[u8]) -> impl Iterator<Item = &[u8]> {
	key.split(|&b| b == SEPARATOR)
}
