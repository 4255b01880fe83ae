use std::fmt;

use crate::wire::{Notify, Reader};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    pub code: u8,
    pub subcode: u8,
    pub data: Vec<u8>,
}

impl Notification {
    pub fn new(code: u8, subcode: u8) -> Self {
        Self {
            code,
            subcode,
            data: Vec::new(),
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.data.len());
        buf.push(self.code);
        buf.push(self.subcode);
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn unpack(payload: &[u8]) -> Result<Self, Notify> {
        let mut reader = Reader::new(payload);
        let code = reader.u8().map_err(|_| Notify::new(1, 2))?;
        let subcode = reader.u8().map_err(|_| Notify::new(1, 2))?;
        Ok(Self {
            code,
            subcode,
            data: reader.rest().to_vec(),
        })
    }
}

impl From<Notify> for Notification {
    fn from(notify: Notify) -> Self {
        Self {
            code: notify.code,
            subcode: notify.subcode,
            data: notify.data,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            Notify::with_data(self.code, self.subcode, self.data.clone())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let notification = Notification {
            code: 6,
            subcode: 2,
            data: vec![0x01, 0x02],
        };
        let decoded = Notification::unpack(&notification.pack()).unwrap();
        assert_eq!(decoded, notification);
    }

    #[test]
    fn test_truncated() {
        assert!(Notification::unpack(&[4]).is_err());
    }
}
