// src/rtmp/handshake.rs - Client side of the simple RTMP handshake
//
// C0 and C1 go out back to back, then S0/S1 are read, C2 echoes S1 and S2
// closes the exchange.

use crate::error::{ProtocolError, Result};
use log::debug;
use rand::RngCore;
use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

pub const RTMP_VERSION: u8 = 0x03;
pub const HANDSHAKE_SIZE: usize = 1536;

/// Handshake state for one connection attempt.
pub struct Handshake {
    c1: Vec<u8>,
    s1: Vec<u8>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        // time (4) | zero (4) | random (1528)
        let mut c1 = vec![0u8; HANDSHAKE_SIZE];
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        c1[..4].copy_from_slice(&now.to_be_bytes());
        rand::thread_rng().fill_bytes(&mut c1[8..]);
        Self { c1, s1: Vec::new() }
    }

    pub fn write_c0<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&[RTMP_VERSION])?;
        Ok(())
    }

    pub fn write_c1<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.c1)?;
        Ok(())
    }

    pub fn read_s0<R: Read>(&self, reader: &mut R) -> Result<()> {
        let mut s0 = [0u8; 1];
        reader.read_exact(&mut s0)?;
        if s0[0] != RTMP_VERSION {
            return Err(ProtocolError::Handshake(format!(
                "unsupported server version {:#04x}",
                s0[0]
            ))
            .into());
        }
        Ok(())
    }

    pub fn read_s1<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let mut s1 = vec![0u8; HANDSHAKE_SIZE];
        reader.read_exact(&mut s1)?;
        self.s1 = s1;
        Ok(())
    }

    /// C2 echoes S1.
    pub fn write_c2<W: Write>(&self, writer: &mut W) -> Result<()> {
        if self.s1.len() != HANDSHAKE_SIZE {
            return Err(ProtocolError::Handshake("S1 not received".to_string()).into());
        }
        writer.write_all(&self.s1)?;
        Ok(())
    }

    /// Reads S2. A server that does not echo C1 exactly is tolerated.
    pub fn read_s2<R: Read>(&self, reader: &mut R) -> Result<()> {
        let mut s2 = vec![0u8; HANDSHAKE_SIZE];
        reader.read_exact(&mut s2)?;
        if s2[8..] != self.c1[8..] {
            debug!("S2 does not echo C1 random bytes");
        }
        Ok(())
    }

    /// Runs the whole exchange.
    pub fn perform<R: Read, W: Write>(mut self, reader: &mut R, writer: &mut W) -> Result<()> {
        self.write_c0(writer)?;
        // C1 without waiting for S0
        self.write_c1(writer)?;
        writer.flush()?;
        self.read_s0(reader)?;
        self.read_s1(reader)?;
        self.write_c2(writer)?;
        writer.flush()?;
        self.read_s2(reader)?;
        Ok(())
    }
}
