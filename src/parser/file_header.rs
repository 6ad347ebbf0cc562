use crate::errors::HprofDelveError;
use crate::parser::cursor::BinaryCursor;

// the format label is a short NUL-terminated string ("JAVA PROFILE 1.0.2")
const MAX_LABEL_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub format: String,
    pub id_size: u32,
    pub timestamp_millis: u64,
}

/// Decode the dump file header at the start of the mapping: NUL-terminated
/// format label, identifier size, capture timestamp (two u32 halves). Leaves
/// the cursor positioned on the first record.
pub fn read_file_header(cursor: &mut BinaryCursor) -> Result<FileHeader, HprofDelveError> {
    cursor.seek(0);
    let mut label = Vec::new();
    loop {
        let byte = cursor.read_u1()?;
        if byte == 0 {
            break;
        }
        label.push(byte);
        if label.len() > MAX_LABEL_LEN {
            return Err(HprofDelveError::InvalidHprofFile {
                message: "unterminated format label".to_string(),
            });
        }
    }
    let id_size = cursor.read_u4()?;
    let epoch_hi = cursor.read_u4()?;
    let epoch_lo = cursor.read_u4()?;
    Ok(FileHeader {
        format: String::from_utf8_lossy(&label).to_string(),
        id_size,
        timestamp_millis: (u64::from(epoch_hi) << 32) | u64::from(epoch_lo),
    })
}
