//! # Configuration Wire Format
//!
//! The controller receives schedule updates as UTF-8 text over the
//! request/reply channel: `#`-separated entries, each entry a
//! `slot_id,mac_address,tid_mask` triple. MAC addresses use the hex-colon
//! form (`aa:bb:cc:dd:ee:ff`), TID masks are decimal.
//!
//! Updates are parsed into typed [`SlotAssignment`]s before they touch any
//! scheduling state; raw strings never cross into the slot table.
//!
//! The per-slot push toward the radio control interface is a packed blob of
//! 7-byte station tuples (6 MAC bytes + 1 mask byte).

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::schedule::SlotEntry;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Control request prefix that triggers orderly shutdown.
pub const TERMINATE: &str = "TERMINATE";

/// Positive acknowledgement frame on the control channel.
pub const ACK_OK: &[u8; 2] = b"OK";

/// Negative acknowledgement frame for a rejected update.
pub const ACK_ERR: &[u8; 2] = b"ER";

/// Wire size of one station tuple in the radio push blob.
pub const STATION_TUPLE_LEN: usize = 7;

/// Separator between entries in an update message and between stations in a
/// rendered slot.
pub const ENTRY_SEP: char = '#';

/// Separator between fields within an entry.
pub const FIELD_SEP: char = ',';

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Reasons a configuration update is rejected.
///
/// A rejected update leaves the installed slot table untouched; the control
/// channel answers with [`ACK_ERR`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An entry did not have exactly three `,`-separated fields.
    #[error("malformed entry `{0}`: expected slot_id,mac_address,tid_mask")]
    MalformedEntry(String),
    /// The slot id is not a number.
    #[error("invalid slot id `{0}`")]
    BadSlotId(String),
    /// The slot id does not fit the configured frame.
    #[error("slot id {slot} out of range: frame has {slots_per_frame} slots")]
    SlotOutOfRange { slot: usize, slots_per_frame: usize },
    /// The station address is not a 6-octet hex-colon MAC.
    #[error("invalid station address `{0}`")]
    BadStation(String),
    /// The TID mask is not a decimal integer in 0..=255.
    #[error("invalid tid mask `{0}`")]
    BadTidMask(String),
}

// ─── Station address ────────────────────────────────────────────────────────

/// A station MAC address in the schedule.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Raw octets.
    #[inline]
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| ConfigError::BadStation(s.to_string()))?;
            if part.is_empty() || part.len() > 2 {
                return Err(ConfigError::BadStation(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| ConfigError::BadStation(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ConfigError::BadStation(s.to_string()));
        }
        Ok(MacAddr(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

// ─── TID mask ───────────────────────────────────────────────────────────────

/// Per-station traffic-identifier bitmask (one bit per TID, 8 TIDs).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TidMask(pub u8);

impl TidMask {
    /// Raw mask bits.
    #[inline]
    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl FromStr for TidMask {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u8>()
            .map(TidMask)
            .map_err(|_| ConfigError::BadTidMask(s.to_string()))
    }
}

impl fmt::Display for TidMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ─── Update parsing ─────────────────────────────────────────────────────────

/// One parsed entry of a schedule update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAssignment {
    /// Target slot within the frame, already bounds-checked.
    pub slot: usize,
    /// Station the access window applies to.
    pub station: MacAddr,
    /// TIDs the station may transmit during the slot.
    pub tids: TidMask,
}

/// Parse a full update message into typed assignments.
///
/// The whole message is validated before anything is applied; the first bad
/// entry rejects the update. An empty (or whitespace-only) message is a valid
/// update that clears every slot.
pub fn parse_update(
    msg: &str,
    slots_per_frame: usize,
) -> Result<Vec<SlotAssignment>, ConfigError> {
    let msg = msg.trim();
    if msg.is_empty() {
        return Ok(Vec::new());
    }

    let mut assignments = Vec::new();
    for entry in msg.split(ENTRY_SEP) {
        let fields: Vec<&str> = entry.split(FIELD_SEP).collect();
        if fields.len() != 3 {
            return Err(ConfigError::MalformedEntry(entry.to_string()));
        }

        let slot: usize = fields[0]
            .trim()
            .parse()
            .map_err(|_| ConfigError::BadSlotId(fields[0].to_string()))?;
        if slot >= slots_per_frame {
            return Err(ConfigError::SlotOutOfRange {
                slot,
                slots_per_frame,
            });
        }

        let station: MacAddr = fields[1].trim().parse()?;
        let tids: TidMask = fields[2].trim().parse()?;

        assignments.push(SlotAssignment {
            slot,
            station,
            tids,
        });
    }

    Ok(assignments)
}

// ─── Radio push blob ────────────────────────────────────────────────────────

/// Encode one slot's station set as the packed tuple blob handed to the radio
/// control interface: 6 MAC octets followed by the mask byte, per station,
/// in slot order.
pub fn encode_slot(entries: &[SlotEntry]) -> Bytes {
    let mut buf = BytesMut::with_capacity(entries.len() * STATION_TUPLE_LEN);
    for entry in entries {
        buf.put_slice(&entry.station.octets());
        buf.put_u8(entry.tids.bits());
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── MacAddr ────────────────────────────────────────────────────────

    #[test]
    fn mac_parses_hex_colon_form() {
        let mac: MacAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(mac.octets(), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    }

    #[test]
    fn mac_parses_single_digit_octets() {
        // sscanf %hhx accepts single hex digits; so do we.
        let mac: MacAddr = "0:1:2:a:b:c".parse().unwrap();
        assert_eq!(mac.octets(), [0, 1, 2, 0xa, 0xb, 0xc]);
    }

    #[test]
    fn mac_display_round_trips() {
        let mac: MacAddr = "00:1B:2c:3D:4e:5F".parse().unwrap();
        assert_eq!(mac.to_string(), "00:1b:2c:3d:4e:5f");
        let again: MacAddr = mac.to_string().parse().unwrap();
        assert_eq!(mac, again);
    }

    #[test]
    fn mac_rejects_wrong_octet_count() {
        assert!("aa:bb:cc:dd:ee".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddr>().is_err());
    }

    #[test]
    fn mac_rejects_non_hex() {
        assert!("aa:bb:cc:dd:ee:zz".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    // ─── TidMask ────────────────────────────────────────────────────────

    #[test]
    fn tid_mask_parses_decimal() {
        assert_eq!("3".parse::<TidMask>().unwrap(), TidMask(3));
        assert_eq!("255".parse::<TidMask>().unwrap(), TidMask(255));
    }

    #[test]
    fn tid_mask_rejects_out_of_range() {
        assert!("256".parse::<TidMask>().is_err());
        assert!("-1".parse::<TidMask>().is_err());
        assert!("0x3".parse::<TidMask>().is_err());
    }

    // ─── parse_update ───────────────────────────────────────────────────

    #[test]
    fn parses_two_entry_update() {
        let parsed =
            parse_update("0,aa:bb:cc:dd:ee:ff,3#1,11:22:33:44:55:66,1", 10).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].slot, 0);
        assert_eq!(parsed[0].tids, TidMask(3));
        assert_eq!(parsed[1].slot, 1);
        assert_eq!(parsed[1].station.to_string(), "11:22:33:44:55:66");
    }

    #[test]
    fn empty_update_clears() {
        assert!(parse_update("", 10).unwrap().is_empty());
        assert!(parse_update("   ", 10).unwrap().is_empty());
    }

    #[test]
    fn rejects_out_of_range_slot() {
        let err = parse_update("10,aa:bb:cc:dd:ee:ff,3", 10).unwrap_err();
        assert_eq!(
            err,
            ConfigError::SlotOutOfRange {
                slot: 10,
                slots_per_frame: 10
            }
        );
    }

    #[test]
    fn rejects_malformed_entry() {
        assert!(matches!(
            parse_update("0,aa:bb:cc:dd:ee:ff", 10).unwrap_err(),
            ConfigError::MalformedEntry(_)
        ));
        assert!(matches!(
            parse_update("0,aa:bb:cc:dd:ee:ff,3,extra", 10).unwrap_err(),
            ConfigError::MalformedEntry(_)
        ));
    }

    #[test]
    fn rejects_bad_slot_id() {
        assert!(matches!(
            parse_update("x,aa:bb:cc:dd:ee:ff,3", 10).unwrap_err(),
            ConfigError::BadSlotId(_)
        ));
    }

    #[test]
    fn first_bad_entry_rejects_whole_update() {
        // Second entry is bad; nothing from the first should survive either.
        let err = parse_update("0,aa:bb:cc:dd:ee:ff,3#99,11:22:33:44:55:66,1", 10);
        assert!(err.is_err());
    }

    // ─── encode_slot ────────────────────────────────────────────────────

    #[test]
    fn encodes_station_tuples() {
        let entries = vec![
            SlotEntry {
                station: "aa:bb:cc:dd:ee:ff".parse().unwrap(),
                tids: TidMask(3),
            },
            SlotEntry {
                station: "11:22:33:44:55:66".parse().unwrap(),
                tids: TidMask(1),
            },
        ];
        let blob = encode_slot(&entries);
        assert_eq!(blob.len(), 2 * STATION_TUPLE_LEN);
        assert_eq!(&blob[..7], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 3]);
        assert_eq!(&blob[7..], &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 1]);
    }

    #[test]
    fn empty_slot_encodes_empty_blob() {
        assert!(encode_slot(&[]).is_empty());
    }
}
