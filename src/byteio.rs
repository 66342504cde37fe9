//! Bounds-checked reads/writes of arithmetic and fixed-text values at a byte
//! offset within a slice. Every operation validates `offset + size <= len`
//! before touching memory and fails with [`EngineError::ByteIo`] otherwise.
//! Numeric values use host byte order; the on-disk format is not portable
//! across endianness (an accepted non-goal).

use crate::error::EngineError;

fn check(action: &'static str, offset: usize, size: usize, len: usize) -> Result<(), EngineError> {
    if offset.checked_add(size).map_or(true, |end| end > len) {
        return Err(EngineError::ByteIo {
            action,
            needed: offset + size,
            got: len,
        });
    }
    Ok(())
}

pub fn read_u8(buf: &[u8], offset: usize) -> Result<u8, EngineError> {
    check("read_u8", offset, 1, buf.len())?;
    Ok(buf[offset])
}

pub fn write_u8(buf: &mut [u8], offset: usize, value: u8) -> Result<(), EngineError> {
    check("write_u8", offset, 1, buf.len())?;
    buf[offset] = value;
    Ok(())
}

macro_rules! rw_numeric {
    ($read:ident, $write:ident, $ty:ty) => {
        pub fn $read(buf: &[u8], offset: usize) -> Result<$ty, EngineError> {
            let size = std::mem::size_of::<$ty>();
            check(stringify!($read), offset, size, buf.len())?;
            let mut raw = [0u8; std::mem::size_of::<$ty>()];
            raw.copy_from_slice(&buf[offset..offset + size]);
            Ok(<$ty>::from_ne_bytes(raw))
        }

        pub fn $write(buf: &mut [u8], offset: usize, value: $ty) -> Result<(), EngineError> {
            let size = std::mem::size_of::<$ty>();
            check(stringify!($write), offset, size, buf.len())?;
            buf[offset..offset + size].copy_from_slice(&value.to_ne_bytes());
            Ok(())
        }
    };
}

rw_numeric!(read_u16, write_u16, u16);
rw_numeric!(read_u32, write_u32, u32);
rw_numeric!(read_i32, write_i32, i32);
rw_numeric!(read_f64, write_f64, f64);

/// Copy `size` bytes out of `buf` at `offset`, byte for byte, no terminator.
pub fn read_bytes(buf: &[u8], offset: usize, size: usize) -> Result<&[u8], EngineError> {
    check("read_bytes", offset, size, buf.len())?;
    Ok(&buf[offset..offset + size])
}

/// Write `src` into `buf` at `offset`. `src.len()` is the size checked.
pub fn write_bytes(buf: &mut [u8], offset: usize, src: &[u8]) -> Result<(), EngineError> {
    check("write_bytes", offset, src.len(), buf.len())?;
    buf[offset..offset + src.len()].copy_from_slice(src);
    Ok(())
}

/// `memmove` a run of `count` bytes starting at `src_offset` to `dst_offset`
/// within the same buffer. Used by node slot-shift operations.
pub fn move_bytes(
    buf: &mut [u8],
    src_offset: usize,
    dst_offset: usize,
    count: usize,
) -> Result<(), EngineError> {
    check("move_bytes(src)", src_offset, count, buf.len())?;
    check("move_bytes(dst)", dst_offset, count, buf.len())?;
    buf.copy_within(src_offset..src_offset + count, dst_offset);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_numeric_values() {
        let mut buf = [0u8; 16];
        write_i32(&mut buf, 0, -42).unwrap();
        write_f64(&mut buf, 4, 2.5).unwrap();
        assert_eq!(read_i32(&buf, 0).unwrap(), -42);
        assert_eq!(read_f64(&buf, 4).unwrap(), 2.5);
    }

    #[test]
    fn out_of_range_fails() {
        let buf = [0u8; 4];
        assert!(matches!(
            read_i32(&buf, 2),
            Err(EngineError::ByteIo { .. })
        ));
    }

    #[test]
    fn move_bytes_shifts_a_run() {
        let mut buf = [1u8, 2, 3, 4, 0, 0];
        move_bytes(&mut buf, 0, 2, 4).unwrap();
        assert_eq!(buf, [1, 2, 1, 2, 3, 4]);
    }
}
