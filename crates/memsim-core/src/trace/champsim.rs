//! Champsim binary trace format: a fixed 64-byte record per instruction,
//! carrying an IP, register read/write sets for branch classification, and
//! up to two store / four load byte addresses.
//!
//! Grounded in the original's `ChampSimTraceFormat` (`trace/fmt.h`,
//! `trace/data.cpp`).

use std::io::Read;

use super::branch::{self, BranchType};
use super::{TraceRecord, TraceReader};
use crate::error::{SimError, TraceError};

const NUM_DST: usize = 2;
const NUM_SRC: usize = 4;
/// `ip(8) + is_branch(1) + branch_taken(1) + dst_regs(2) + src_regs(4) +
/// dst_mem(16) + src_mem(32)`.
const RECORD_SIZE: usize = 8 + 1 + 1 + NUM_DST + NUM_SRC + NUM_DST * 8 + NUM_SRC * 8;

/// Decodes a stream of Champsim records into [`TraceRecord`]s, assigning a
/// running sequence number (the format carries none).
pub struct ChampsimReader<R> {
    inner: R,
    path: String,
    linesize: u64,
    next_inst_num: u64,
    bytes_read: u64,
}

impl<R: Read> ChampsimReader<R> {
    #[must_use]
    pub fn new(inner: R, path: String, linesize: u64) -> Self {
        Self { inner, path, linesize, next_inst_num: 0, bytes_read: 0 }
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
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated champsim record"))
        } else {
            Ok(Some(buf))
        }
    }

    fn decode(&mut self, buf: &[u8; RECORD_SIZE]) -> Result<TraceRecord, SimError> {
        let ip = u64::from_le_bytes(buf[0..8].try_into().unwrap_or_else(|_| unreachable!()));
        let branch_taken = buf[9] != 0;
        let dst_regs = [buf[10], buf[11]];
        let src_regs = [buf[12], buf[13], buf[14], buf[15]];

        let mut off = 16;
        let mut dst_mem = [0u64; NUM_DST];
        for slot in &mut dst_mem {
            *slot = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap_or_else(|_| unreachable!()));
            off += 8;
        }
        let mut src_mem = [0u64; NUM_SRC];
        for slot in &mut src_mem {
            *slot = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap_or_else(|_| unreachable!()));
            off += 8;
        }

        let inst_num = self.next_inst_num;
        self.next_inst_num += 1;

        let branch_type = branch::classify(inst_num, &dst_regs, &src_regs)?;

        let line_of = |addr: u64| addr / self.linesize;
        let stores = dst_mem.iter().copied().filter(|&a| a != 0).map(line_of).collect();
        let loads = src_mem.iter().copied().filter(|&a| a != 0).map(line_of).collect();

        Ok(TraceRecord { inst_num, ip: Some(ip), branch_type, branch_taken, loads, stores })
    }
}

impl<R: Read> Iterator for ChampsimReader<R> {
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
        Some(self.decode(&buf))
    }
}

impl<R: Read> TraceReader for ChampsimReader<R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn record(ip: u64, dst_regs: [u8; 2], src_regs: [u8; 4], dst_mem: [u64; 2], src_mem: [u64; 4]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_SIZE);
        buf.extend_from_slice(&ip.to_le_bytes());
        let is_branch = dst_regs.contains(&26);
        buf.push(u8::from(is_branch));
        buf.push(1);
        buf.extend_from_slice(&dst_regs);
        buf.extend_from_slice(&src_regs);
        for m in dst_mem {
            buf.extend_from_slice(&m.to_le_bytes());
        }
        for m in src_mem {
            buf.extend_from_slice(&m.to_le_bytes());
        }
        buf
    }

    #[test]
    fn decodes_a_non_branch_load() {
        let bytes = record(0x400000, [0, 0], [0, 0, 0, 0], [0, 0], [0x8000, 0, 0, 0]);
        let mut r = ChampsimReader::new(Cursor::new(bytes), "test".into(), 64);
        let rec = r.next().unwrap().unwrap();
        assert_eq!(rec.ip, Some(0x400000));
        assert_eq!(rec.branch_type, BranchType::Invalid);
        assert_eq!(rec.loads, vec![0x8000 / 64]);
        assert!(rec.stores.is_empty());
        assert!(r.next().is_none());
    }

    #[test]
    fn decodes_a_direct_jump() {
        let bytes = record(0x401000, [26, 0], [1, 0, 0, 0], [0, 0], [0, 0, 0, 0]);
        let mut r = ChampsimReader::new(Cursor::new(bytes), "test".into(), 64);
        let rec = r.next().unwrap().unwrap();
        assert_eq!(rec.branch_type, BranchType::Direct);
    }

    #[test]
    fn assigns_sequential_inst_nums() {
        let mut bytes = record(0x1000, [0, 0], [0, 0, 0, 0], [0, 0], [0, 0, 0, 0]);
        bytes.extend(record(0x1004, [0, 0], [0, 0, 0, 0], [0, 0], [0, 0, 0, 0]));
        let mut r = ChampsimReader::new(Cursor::new(bytes), "test".into(), 64);
        assert_eq!(r.next().unwrap().unwrap().inst_num, 0);
        assert_eq!(r.next().unwrap().unwrap().inst_num, 1);
    }

    #[test]
    fn truncated_record_is_an_error() {
        let mut r = ChampsimReader::new(Cursor::new(vec![1, 2, 3]), "test".into(), 64);
        assert!(matches!(r.next(), Some(Err(SimError::Trace(TraceError::TruncatedRecord { .. })))));
    }
}
