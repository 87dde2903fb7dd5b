//! A scripted card for driving flows without hardware. Each entry is one
//! expected command APDU and the raw response (data + status word) to hand
//! back. A mismatch panics with both hex strings so the failing test shows
//! the exact divergence.

use crate::errors::TransportError;
use crate::exchange::CardTransport;

pub struct MockCard {
    script: Vec<(Vec<u8>, Vec<u8>)>,
    cursor: usize,
    atr: Vec<u8>,
    resets: usize,
}

impl MockCard {
    pub fn new(script: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        // A typical USIM ATR
        Self::with_atr(
            hex::decode("3b9f96801fc78031a073be21136743200718000001a5").unwrap(),
            script,
        )
    }

    pub fn with_atr(atr: Vec<u8>, script: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        MockCard {
            script,
            cursor: 0,
            atr,
            resets: 0,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.cursor == self.script.len()
    }

    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl CardTransport for MockCard {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>, TransportError> {
        let (expected, response) = self
            .script
            .get(self.cursor)
            .unwrap_or_else(|| panic!("unscripted APDU {}", hex::encode(apdu)));
        assert_eq!(
            hex::encode(apdu),
            hex::encode(expected),
            "APDU #{} diverged",
            self.cursor
        );
        self.cursor += 1;
        Ok(response.clone())
    }

    fn reset(&mut self) -> Result<Vec<u8>, TransportError> {
        self.resets += 1;
        Ok(self.atr.clone())
    }

    fn atr(&self) -> &[u8] {
        &self.atr
    }
}
