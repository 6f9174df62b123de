//! Embedded preview extraction from TIFF-shaped RAW containers.
//!
//! Most RAW formats (ARW, NEF, CR2, DNG) are TIFF containers that carry a
//! JPEG preview in a SubIFD or in IFD1. Pulling that preview out needs no
//! demosaicing, so thumbnail unpacking stays cheap regardless of sensor
//! resolution.

use super::EngineStatus;

const TIFF_LE: [u8; 4] = [0x49, 0x49, 0x2A, 0x00];
const TIFF_BE: [u8; 4] = [0x4D, 0x4D, 0x00, 0x2A];

const TAG_IMAGE_WIDTH: u16 = 0x0100;
const TAG_IMAGE_LENGTH: u16 = 0x0101;
const TAG_JPEG_OFFSET: u16 = 0x0201;
const TAG_JPEG_LENGTH: u16 = 0x0202;
const TAG_STRIP_OFFSETS: u16 = 0x0111;
const TAG_STRIP_BYTE_COUNTS: u16 = 0x0117;
const TAG_COMPRESSION: u16 = 0x0103;
const TAG_SUBIFD: u16 = 0x014A;

const COMPRESSION_JPEG: u32 = 6;
const COMPRESSION_JPEG_NEW: u32 = 7;

/// Check whether a buffer looks like a TIFF-based RAW container.
pub fn looks_like_raw(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && (bytes[..4] == TIFF_LE || bytes[..4] == TIFF_BE)
}

/// Extract the largest embedded JPEG preview from a RAW container.
///
/// Walks IFD0, then any SubIFDs, then IFD1, collecting every candidate
/// JPEG block, and returns the biggest one (SubIFD previews on modern
/// cameras dwarf the EXIF thumbnail). Fails with `NO_THUMBNAIL` when the
/// container is valid TIFF but carries no preview, `FILE_UNSUPPORTED`
/// when it is not TIFF at all, and `DATA_ERROR` on truncated structures.
pub fn extract_embedded_jpeg(bytes: &[u8]) -> Result<Vec<u8>, EngineStatus> {
    let le = if bytes.len() >= 8 && bytes[..4] == TIFF_LE {
        true
    } else if bytes.len() >= 8 && bytes[..4] == TIFF_BE {
        false
    } else {
        return Err(EngineStatus::FILE_UNSUPPORTED);
    };

    let ifd0 = read_u32(bytes, 4, le).ok_or(EngineStatus::DATA_ERROR)? as usize;

    let mut candidates: Vec<&[u8]> = Vec::new();
    let mut ifd_queue = vec![ifd0];
    // Bounded walk; broken files can contain IFD cycles.
    let mut visited = 0;

    while let Some(offset) = ifd_queue.pop() {
        visited += 1;
        if visited > 32 {
            break;
        }
        let (jpeg, subifds, next) = scan_ifd(bytes, offset, le)?;
        if let Some(data) = jpeg {
            candidates.push(data);
        }
        ifd_queue.extend(subifds);
        if next != 0 {
            ifd_queue.push(next as usize);
        }
    }

    candidates
        .into_iter()
        .max_by_key(|c| c.len())
        .map(|c| c.to_vec())
        .ok_or(EngineStatus::NO_THUMBNAIL)
}

/// Largest frame dimensions advertised by the container's IFDs.
///
/// IFD0 (or a SubIFD) of a TIFF-shaped RAW describes the full-resolution
/// frame long before any sensor decode, so geometry queries can answer
/// straight after load. Returns `None` for non-TIFF containers or when no
/// IFD carries both dimension tags.
pub fn container_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if !looks_like_raw(bytes) {
        return None;
    }
    let le = bytes[..4] == TIFF_LE;
    let ifd0 = read_u32(bytes, 4, le)? as usize;

    let mut best: Option<(u32, u32)> = None;
    let mut ifd_queue = vec![ifd0];
    let mut visited = 0;

    while let Some(offset) = ifd_queue.pop() {
        visited += 1;
        if visited > 32 {
            break;
        }
        let Ok((dims, subifds, next)) = measure_ifd(bytes, offset, le) else {
            break;
        };
        if let Some((w, h)) = dims {
            let area = u64::from(w) * u64::from(h);
            if best.is_none_or(|(bw, bh)| area > u64::from(bw) * u64::from(bh)) {
                best = Some((w, h));
            }
        }
        ifd_queue.extend(subifds);
        if next != 0 {
            ifd_queue.push(next as usize);
        }
    }
    best
}

/// Scan one IFD for its frame dimensions and SubIFD pointers.
fn measure_ifd(
    bytes: &[u8],
    offset: usize,
    le: bool,
) -> Result<(Option<(u32, u32)>, Vec<usize>, u32), EngineStatus> {
    let count = read_u16(bytes, offset, le).ok_or(EngineStatus::DATA_ERROR)? as usize;
    if count > 512 {
        return Err(EngineStatus::DATA_ERROR);
    }

    let mut width = None;
    let mut height = None;
    let mut subifds = Vec::new();

    for i in 0..count {
        let entry = offset + 2 + i * 12;
        let tag = read_u16(bytes, entry, le).ok_or(EngineStatus::DATA_ERROR)?;
        match tag {
            TAG_IMAGE_WIDTH => width = read_entry_value(bytes, entry, le),
            TAG_IMAGE_LENGTH => height = read_entry_value(bytes, entry, le),
            TAG_SUBIFD => {
                if let Some(value) = read_u32(bytes, entry + 8, le) {
                    if (value as usize) < bytes.len() {
                        subifds.push(value as usize);
                    }
                }
            }
            _ => {}
        }
    }

    let next = read_u32(bytes, offset + 2 + count * 12, le).unwrap_or(0);
    let dims = width.zip(height).filter(|&(w, h)| w > 0 && h > 0);
    Ok((dims, subifds, next))
}

/// Inline entry value; SHORT values sit in the leading bytes of the
/// 4-byte value field, so they need a type-aware read.
fn read_entry_value(bytes: &[u8], entry: usize, le: bool) -> Option<u32> {
    match read_u16(bytes, entry + 2, le)? {
        3 => read_u16(bytes, entry + 8, le).map(u32::from),
        4 => read_u32(bytes, entry + 8, le),
        _ => None,
    }
}

/// Scan one IFD for a JPEG block and SubIFD pointers.
fn scan_ifd(
    bytes: &[u8],
    offset: usize,
    le: bool,
) -> Result<(Option<&[u8]>, Vec<usize>, u32), EngineStatus> {
    let count = read_u16(bytes, offset, le).ok_or(EngineStatus::DATA_ERROR)? as usize;
    if count > 512 {
        return Err(EngineStatus::DATA_ERROR);
    }

    let mut jpeg_offset = None;
    let mut jpeg_length = None;
    let mut strip_offset = None;
    let mut strip_length = None;
    let mut compression = None;
    let mut subifds = Vec::new();

    for i in 0..count {
        let entry = offset + 2 + i * 12;
        let tag = read_u16(bytes, entry, le).ok_or(EngineStatus::DATA_ERROR)?;
        let value = read_u32(bytes, entry + 8, le).ok_or(EngineStatus::DATA_ERROR)?;
        match tag {
            TAG_JPEG_OFFSET => jpeg_offset = Some(value),
            TAG_JPEG_LENGTH => jpeg_length = Some(value),
            TAG_STRIP_OFFSETS => strip_offset = Some(value),
            TAG_STRIP_BYTE_COUNTS => strip_length = Some(value),
            TAG_COMPRESSION => compression = Some(value),
            TAG_SUBIFD => {
                if (value as usize) < bytes.len() {
                    subifds.push(value as usize);
                }
            }
            _ => {}
        }
    }

    let next = read_u32(bytes, offset + 2 + count * 12, le).unwrap_or(0);

    // JPEG interchange tags take precedence; strip storage only counts
    // when the strip is actually JPEG-compressed.
    let jpeg = match (jpeg_offset, jpeg_length) {
        (Some(o), Some(l)) => jpeg_slice(bytes, o, l),
        _ => match (strip_offset, strip_length, compression) {
            (Some(o), Some(l), Some(c)) if c == COMPRESSION_JPEG || c == COMPRESSION_JPEG_NEW => {
                jpeg_slice(bytes, o, l)
            }
            _ => None,
        },
    };

    Ok((jpeg, subifds, next))
}

/// Bounds-checked slice that must start with a JPEG SOI marker.
fn jpeg_slice(bytes: &[u8], offset: u32, length: u32) -> Option<&[u8]> {
    let start = offset as usize;
    let end = start.checked_add(length as usize)?;
    if length < 2 || end > bytes.len() {
        return None;
    }
    let slice = &bytes[start..end];
    if slice[0] == 0xFF && slice[1] == 0xD8 {
        Some(slice)
    } else {
        None
    }
}

fn read_u16(bytes: &[u8], offset: usize, le: bool) -> Option<u16> {
    let raw: [u8; 2] = bytes.get(offset..offset + 2)?.try_into().ok()?;
    Some(if le {
        u16::from_le_bytes(raw)
    } else {
        u16::from_be_bytes(raw)
    })
}

fn read_u32(bytes: &[u8], offset: usize, le: bool) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(if le {
        u32::from_le_bytes(raw)
    } else {
        u32::from_be_bytes(raw)
    })
}
