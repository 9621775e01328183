//! Memsim binary trace format: a compact 10-byte record carrying an
//! explicit instruction number, a read/write flag, and a virtual line
//! address already at line granularity. Carries no IP: traces in this
//! format drive the hierarchy directly off `v_lineaddr`, the original's
//! IP-less "simple model" path (no ITLB, no page-table walker for
//! instruction fetch).
//!
//! Grounded in the original's `MemsimTraceFormat` (`trace/fmt.h`).

use std::io::Read;

use super::branch::BranchType;
use super::{TraceRecord, TraceReader};
use crate::error::{SimError, TraceError};

/// `inst_num(5) + is_write(1) + v_lineaddr(4)`.
const RECORD_SIZE: usize = 5 + 1 + 4;

pub struct MemsimReader<R> {
    inner: R,
    path: String,
    bytes_read: u64,
}

impl<R: Read> MemsimReader<R> {
    #[must_use]
    pub fn new(inner: R, path: String) -> Self {
        Self { inner, path, bytes_read: 0 }
    }

    fn read_record(&mut self) -> std::io::Result<Option<[u8; RECORD_SIZE]>> {
        let mut buf = [0u8; RECORD_SIZE];
        let mut filled = 0;
        loop {
            match self.inner.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
            if filled == RECORD_SIZE {
                break;
            }
        }
        if filled == 0 {
            Ok(None)
        } else if filled != RECORD_SIZE {
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated memsim record"))
        } else {
            Ok(Some(buf))
        }
    }

    fn decode(buf: &[u8; RECORD_SIZE]) -> TraceRecord {
        let mut inst_num_bytes = [0u8; 8];
        inst_num_bytes[..5].copy_from_slice(&buf[0..5]);
        let inst_num = u64::from_le_bytes(inst_num_bytes);
        let is_write = buf[5] != 0;
        let v_lineaddr = u32::from_le_bytes(buf[6..10].try_into().unwrap_or_else(|_| unreachable!())) as u64;

        let (loads, stores) = if is_write { (Vec::new(), vec![v_lineaddr]) } else { (vec![v_lineaddr], Vec::new()) };

        TraceRecord { inst_num, ip: None, branch_type: BranchType::Invalid, branch_taken: false, loads, stores }
    }
}

impl<R: Read> Iterator for MemsimReader<R> {
    type Item = Result<TraceRecord, SimError>;

    fn next(&mut self) -> Option<Self::Item> {
        let buf = match self.read_record() {
            Ok(Some(buf)) => buf,
            Ok(None) => return None,
            Err(_) => {
                return Some(Err(SimError::Trace(TraceError::TruncatedRecord {
                    path: self.path.clone(),
                    offset: self.bytes_read,
                })))
            }
        };
        self.bytes_read += RECORD_SIZE as u64;
        Some(Ok(Self::decode(&buf)))
    }
}

impl<R: Read> TraceReader for MemsimReader<R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn record(inst_num: u64, is_write: bool, v_lineaddr: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_SIZE);
        buf.extend_from_slice(&inst_num.to_le_bytes()[..5]);
        buf.push(u8::from(is_write));
        buf.extend_from_slice(&v_lineaddr.to_le_bytes());
        buf
    }

    #[test]
    fn decodes_a_load() {
        let bytes = record(7, false, 0x1234);
        let mut r = MemsimReader::new(Cursor::new(bytes), "test".into());
        let rec = r.next().unwrap().unwrap();
        assert_eq!(rec.inst_num, 7);
        assert_eq!(rec.ip, None);
        assert_eq!(rec.loads, vec![0x1234]);
        assert!(rec.stores.is_empty());
        assert!(r.next().is_none());
    }

    #[test]
    fn decodes_a_store() {
        let bytes = record(8, true, 0x9000);
        let mut r = MemsimReader::new(Cursor::new(bytes), "test".into());
        let rec = r.next().unwrap().unwrap();
        assert_eq!(rec.stores, vec![0x9000]);
        assert!(rec.loads.is_empty());
    }

    #[test]
    fn truncated_record_is_an_error() {
        let mut r = MemsimReader::new(Cursor::new(vec![1, 2, 3]), "test".into());
        assert!(matches!(r.next(), Some(Err(SimError::Trace(TraceError::TruncatedRecord { .. })))));
    }
}
