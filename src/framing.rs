use crate::error::EisError;
use crate::types::ImpedanceSample;
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Bytes in the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;
/// Doubles per flattened sample row.
pub const DOUBLES_PER_ROW: usize = 3;
/// Bytes per flattened sample row.
pub const ROW_SIZE: usize = DOUBLES_PER_ROW * 8;

/// Encode rows as one wire frame: a 4-byte big-endian payload length followed
/// by the rows flattened to little-endian IEEE-754 doubles
/// `(frequency, z_real, z_imag_neg)`. One row per frame is the streaming
/// granularity; a whole finalized buffer in one frame is the batch
/// granularity. Both decode the same way.
pub fn encode_rows(rows: &[ImpedanceSample]) -> Result<Vec<u8>, EisError> {
    let payload_len = rows.len() * ROW_SIZE;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload_len);

    let encode = |frame: &mut Vec<u8>| -> std::io::Result<()> {
        frame.write_u32::<BigEndian>(payload_len as u32)?;
        for row in rows {
            frame.write_f64::<LittleEndian>(row.frequency)?;
            frame.write_f64::<LittleEndian>(row.z_real)?;
            frame.write_f64::<LittleEndian>(row.z_imag_neg)?;
        }
        Ok(())
    };
    encode(&mut frame).map_err(|e| EisError::io(e, "encoding result frame"))?;
    Ok(frame)
}

/// Write one frame containing `rows` to `writer`.
pub fn write_frame<W: Write>(writer: &mut W, rows: &[ImpedanceSample]) -> Result<(), EisError> {
    let frame = encode_rows(rows)?;
    writer
        .write_all(&frame)
        .map_err(|e| EisError::io(e, "transmitting result frame"))?;
    writer
        .flush()
        .map_err(|e| EisError::io(e, "flushing result frame"))
}

/// Read one frame from `reader` and decode its rows. Frame boundaries come
/// purely from the length prefix; there is no delimiter scanning.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<ImpedanceSample>, EisError> {
    let payload_len = reader
        .read_u32::<BigEndian>()
        .map_err(|e| EisError::io(e, "reading frame length"))? as usize;

    let mut payload = vec![0u8; payload_len];
    reader
        .read_exact(&mut payload)
        .map_err(|e| EisError::io(e, "reading frame payload"))?;

    decode_rows(&payload)
}

/// Reshape a frame payload into rows of 3 doubles.
pub fn decode_rows(payload: &[u8]) -> Result<Vec<ImpedanceSample>, EisError> {
    if payload.len() % ROW_SIZE != 0 {
        return Err(EisError::Frame(format!(
            "payload of {} bytes is not a whole number of {ROW_SIZE}-byte rows",
            payload.len()
        )));
    }

    let mut cursor = std::io::Cursor::new(payload);
    let mut rows = Vec::with_capacity(payload.len() / ROW_SIZE);
    for _ in 0..payload.len() / ROW_SIZE {
        let frequency = cursor.read_f64::<LittleEndian>().map_err(frame_err)?;
        let z_real = cursor.read_f64::<LittleEndian>().map_err(frame_err)?;
        let z_imag_neg = cursor.read_f64::<LittleEndian>().map_err(frame_err)?;
        rows.push(ImpedanceSample {
            frequency,
            z_real,
            z_imag_neg,
        });
    }
    Ok(rows)
}

fn frame_err(e: std::io::Error) -> EisError {
    EisError::io(e, "decoding frame payload")
}
