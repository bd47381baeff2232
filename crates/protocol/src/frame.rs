//! Owned Ethernet frames
//!
//! The USB transport reuses its receive buffer as soon as the receive callback
//! returns, so every inbound frame is copied into an [`OwnedFrame`] before it is
//! handed to the IP stack. Ownership then moves with the value: the IP stack
//! releases the buffer by dropping it.

use crate::classify::{DhcpDirection, EtherType, classify_dhcp, ether_type};
use crate::error::{ProtocolError, Result};
use bytes::Bytes;

/// Minimum Ethernet frame length without FCS
pub const MIN_FRAME_LEN: usize = 60;

/// Largest standard Ethernet frame without FCS (1500 MTU + 14 byte header)
pub const MAX_ETHERNET_FRAME_LEN: usize = 1514;

/// Independently owned, size-bounded copy of an Ethernet frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    data: Bytes,
}

impl OwnedFrame {
    /// Copy a borrowed buffer into an owned frame
    ///
    /// Fails for empty input and for input longer than `max_len`; the source
    /// buffer is left untouched either way.
    pub fn copy_from(buf: &[u8], max_len: usize) -> Result<Self> {
        if buf.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        if buf.len() > max_len {
            return Err(ProtocolError::FrameTooLarge {
                size: buf.len(),
                max: max_len,
            });
        }
        Ok(Self {
            data: Bytes::copy_from_slice(buf),
        })
    }

    /// Take ownership of an already-allocated buffer
    pub fn from_vec(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        Ok(Self {
            data: Bytes::from(data),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn ether_type(&self) -> Option<EtherType> {
        ether_type(&self.data)
    }

    pub fn dhcp_direction(&self) -> Option<DhcpDirection> {
        classify_dhcp(&self.data)
    }

    /// Release the frame, returning the underlying buffer
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl AsRef<[u8]> for OwnedFrame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_is_independent_of_source() {
        let mut source = vec![0xAAu8; 64];
        let frame = OwnedFrame::copy_from(&source, 2048).unwrap();

        // Transport overwrites its buffer for the next frame
        source.iter_mut().for_each(|b| *b = 0x55);

        assert_eq!(frame.len(), 64);
        assert!(frame.as_bytes().iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_copy_rejects_empty() {
        assert_eq!(
            OwnedFrame::copy_from(&[], 2048),
            Err(ProtocolError::EmptyFrame)
        );
    }

    #[test]
    fn test_copy_rejects_oversized() {
        let buf = vec![0u8; 2049];
        assert_eq!(
            OwnedFrame::copy_from(&buf, 2048),
            Err(ProtocolError::FrameTooLarge {
                size: 2049,
                max: 2048
            })
        );
    }

    #[test]
    fn test_copy_accepts_exact_max() {
        let buf = vec![1u8; MAX_ETHERNET_FRAME_LEN];
        let frame = OwnedFrame::copy_from(&buf, MAX_ETHERNET_FRAME_LEN).unwrap();
        assert_eq!(frame.len(), MAX_ETHERNET_FRAME_LEN);
    }

    #[test]
    fn test_from_vec() {
        assert!(OwnedFrame::from_vec(Vec::new()).is_err());
        let frame = OwnedFrame::from_vec(vec![1, 2, 3]).unwrap();
        assert_eq!(frame.into_bytes().as_ref(), &[1, 2, 3]);
    }
}
