//! Segment trays for the Messenger/Messengent transaction (C7).
//!
//! A `TxTray` holds the already-packed segments of one outbound message; an
//! `RxTray` accumulates inbound segments until the message is complete.

/// One packed segment, ready to transmit.
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: u16,
    pub packed: Vec<u8>,
}

/// Ordered list of segments for a single outbound application message.
#[derive(Debug, Clone, Default)]
pub struct TxTray {
    pub segments: Vec<Segment>,
}

impl TxTray {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: u16) -> Option<&Segment> {
        self.segments.iter().find(|s| s.index == index)
    }
}

/// Reassembly buffer for an inbound segmented message.
#[derive(Debug, Clone, Default)]
pub struct RxTray {
    /// Segment payloads keyed by index; `None` until that segment arrives.
    slots: Vec<Option<Vec<u8>>>,
    total: Option<u16>,
}

impl RxTray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an inbound segment. `total` is the sender-declared segment count.
    pub fn insert(&mut self, index: u16, total: u16, payload: Vec<u8>) {
        self.total = Some(total);
        if self.slots.len() < total as usize {
            self.slots.resize(total as usize, None);
        }
        if let Some(slot) = self.slots.get_mut(index as usize) {
            *slot = Some(payload);
        }
    }

    pub fn is_complete(&self) -> bool {
        match self.total {
            None => false,
            Some(total) => {
                self.slots.len() == total as usize && self.slots.iter().all(Option::is_some)
            }
        }
    }

    /// Concatenates all segments in order; only meaningful once `is_complete`.
    pub fn reassemble(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let mut body = Vec::new();
        for slot in &self.slots {
            body.extend_from_slice(slot.as_ref().unwrap());
        }
        Some(body)
    }

    /// Indices not yet received, within the observed range, chunked to at
    /// most 64 indices (the resend packet's chunk limit).
    pub fn missed_chunks(&self) -> Vec<Vec<u16>> {
        let missing: Vec<u16> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| if s.is_none() { Some(i as u16) } else { None })
            .collect();
        missing.chunks(64).map(|c| c.to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_only_when_all_segments_present() {
        let mut tray = RxTray::new();
        tray.insert(0, 3, b"aa".to_vec());
        tray.insert(2, 3, b"cc".to_vec());
        assert!(!tray.is_complete());
        assert!(tray.reassemble().is_none());
        tray.insert(1, 3, b"bb".to_vec());
        assert!(tray.is_complete());
        assert_eq!(tray.reassemble().unwrap(), b"aabbcc".to_vec());
    }

    #[test]
    fn missed_chunks_respects_64_limit() {
        let mut tray = RxTray::new();
        tray.insert(0, 200, b"x".to_vec());
        let chunks = tray.missed_chunks();
        assert!(chunks.iter().all(|c| c.len() <= 64));
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 199);
    }
}
