//! Care map encoding and decoding.
//!
//! A care map lists the partitions of a storage device whose blocks must be
//! integrity-checked after an update: an ordered sequence of records, each
//! carrying a partition name and a serialized block range set, optionally
//! tagged with the build property and fingerprint identifying the update
//! the map belongs to. The map exists in two encodings, the legacy
//! line-oriented text layout and a binary frame, and converts between them
//! losslessly in either direction.

use crc::{Crc, CRC_16_IBM_SDLC};

pub mod ranges;

/// CRC-16 calculator for frame integrity
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Magic number identifying a binary care map frame
pub const CARE_MAP_MAGIC: u16 = 0xCA9E;

/// Flag bit set when every record carries a property id and fingerprint
const FLAG_FINGERPRINT: u8 = 0x01;

/// Fixed frame overhead: magic, flags, partition count, trailing CRC
const FRAME_OVERHEAD: usize = 9;

/// Errors produced while encoding or decoding a care map
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("found {found} care map lines, expected a multiple of {step}")]
    UnalignedLineCount { found: usize, step: usize },
    #[error("{0} is required in care_map")]
    MissingField(&'static str),
    #[error("partition {0:?} carries a fingerprint but the care map layout has none")]
    UnexpectedFingerprint(String),
    #[error("care map frame truncated at byte {offset}")]
    Truncated { offset: usize },
    #[error("invalid magic number 0x{0:04X}")]
    InvalidMagic(u16),
    #[error("unsupported frame flags 0x{0:02X}")]
    UnsupportedFlags(u8),
    #[error("{0} trailing bytes after the last partition record")]
    TrailingBytes(usize),
    #[error("CRC mismatch: stored 0x{stored:04X}, computed 0x{computed:04X}")]
    CrcMismatch { stored: u16, computed: u16 },
    #[error("care map field is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Layout of one partition record in the legacy text format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLayout {
    /// Two lines per partition: name and block ranges
    Basic,
    /// Four lines per partition: name, block ranges, property id, fingerprint
    WithFingerprint,
}

impl RecordLayout {
    /// Select the layout from the converter's fingerprint mode flag
    pub fn from_fingerprint_enabled(enabled: bool) -> Self {
        if enabled {
            Self::WithFingerprint
        } else {
            Self::Basic
        }
    }

    /// Number of text lines one partition record occupies
    pub const fn lines_per_partition(self) -> usize {
        match self {
            Self::Basic => 2,
            Self::WithFingerprint => 4,
        }
    }
}

/// Expected build identity attached to a partition record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Property key the device resolves at verification time
    pub id: String,
    /// Expected property value
    pub value: String,
}

/// One partition whose blocks are covered by the care map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    /// Serialized block range set, carried verbatim
    pub ranges: String,
    pub fingerprint: Option<Fingerprint>,
}

impl Partition {
    /// Create a partition record without build identity
    pub fn new(name: impl Into<String>, ranges: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ranges: ranges.into(),
            fingerprint: None,
        }
    }

    /// Create a partition record with a property id and fingerprint
    pub fn with_fingerprint(
        name: impl Into<String>,
        ranges: impl Into<String>,
        id: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            ranges: ranges.into(),
            fingerprint: Some(Fingerprint {
                id: id.into(),
                value: value.into(),
            }),
        }
    }
}

/// An ordered care map document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CareMap {
    pub layout: RecordLayout,
    pub partitions: Vec<Partition>,
}

impl CareMap {
    /// Create an empty care map with the given record layout
    pub fn new(layout: RecordLayout) -> Self {
        Self {
            layout,
            partitions: Vec::new(),
        }
    }

    /// Whether every record carries a property id and fingerprint
    pub fn fingerprint_enabled(&self) -> bool {
        self.layout == RecordLayout::WithFingerprint
    }

    /// Parse the legacy line-oriented layout.
    ///
    /// `lines` is the already-split text, without a trailing newline entry.
    /// Records are taken positionally; field content is carried through
    /// without validation, and input order is preserved.
    pub fn from_legacy_lines(lines: &[&str], layout: RecordLayout) -> Result<Self, FormatError> {
        let step = layout.lines_per_partition();
        if lines.len() % step != 0 {
            return Err(FormatError::UnalignedLineCount {
                found: lines.len(),
                step,
            });
        }

        let partitions = lines
            .chunks(step)
            .map(|record| Partition {
                name: record[0].to_string(),
                ranges: record[1].to_string(),
                fingerprint: (layout == RecordLayout::WithFingerprint).then(|| Fingerprint {
                    id: record[2].to_string(),
                    value: record[3].to_string(),
                }),
            })
            .collect();

        Ok(Self { layout, partitions })
    }

    /// Render the legacy line-oriented layout, without a trailing newline
    pub fn to_legacy(&self) -> Result<String, FormatError> {
        self.validate()?;

        let mut lines = Vec::with_capacity(self.partitions.len() * self.layout.lines_per_partition());
        for partition in &self.partitions {
            lines.push(partition.name.as_str());
            lines.push(partition.ranges.as_str());
            if let Some(fingerprint) = &partition.fingerprint {
                lines.push(fingerprint.id.as_str());
                lines.push(fingerprint.value.as_str());
            }
        }
        Ok(lines.join("\n"))
    }

    /// Serialize the care map to a binary frame
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        self.validate()?;

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&CARE_MAP_MAGIC.to_le_bytes());
        bytes.push(if self.fingerprint_enabled() {
            FLAG_FINGERPRINT
        } else {
            0
        });
        bytes.extend_from_slice(&(self.partitions.len() as u32).to_le_bytes());

        for partition in &self.partitions {
            push_field(&mut bytes, &partition.name);
            push_field(&mut bytes, &partition.ranges);
            if let Some(fingerprint) = &partition.fingerprint {
                push_field(&mut bytes, &fingerprint.id);
                push_field(&mut bytes, &fingerprint.value);
            }
        }

        let crc = CRC16.checksum(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        Ok(bytes)
    }

    /// Deserialize a care map from a binary frame
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(FormatError::Truncated {
                offset: bytes.len(),
            });
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        if magic != CARE_MAP_MAGIC {
            return Err(FormatError::InvalidMagic(magic));
        }

        let flags = bytes[2];
        if flags & !FLAG_FINGERPRINT != 0 {
            return Err(FormatError::UnsupportedFlags(flags));
        }
        let layout = RecordLayout::from_fingerprint_enabled(flags & FLAG_FINGERPRINT != 0);

        let count = u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]) as usize;

        // Records end where the trailing CRC begins
        let payload_end = bytes.len() - 2;
        let mut offset = 7;
        let mut partitions = Vec::new();
        for _ in 0..count {
            let name = read_field(bytes, &mut offset, payload_end)?;
            let ranges = read_field(bytes, &mut offset, payload_end)?;
            let fingerprint = if layout == RecordLayout::WithFingerprint {
                let id = read_field(bytes, &mut offset, payload_end)?;
                let value = read_field(bytes, &mut offset, payload_end)?;
                Some(Fingerprint { id, value })
            } else {
                None
            };
            partitions.push(Partition {
                name,
                ranges,
                fingerprint,
            });
        }

        if offset != payload_end {
            return Err(FormatError::TrailingBytes(payload_end - offset));
        }

        let stored = u16::from_le_bytes([bytes[payload_end], bytes[payload_end + 1]]);
        let computed = CRC16.checksum(&bytes[..payload_end]);
        if stored != computed {
            return Err(FormatError::CrcMismatch { stored, computed });
        }

        let map = Self { layout, partitions };
        map.validate()?;
        Ok(map)
    }

    /// Whole-document validation shared by both encoders and the binary
    /// decoder: required fields must be non-empty, and the presence of the
    /// fingerprint pair must match the document layout on every record.
    fn validate(&self) -> Result<(), FormatError> {
        for partition in &self.partitions {
            if partition.name.is_empty() {
                return Err(FormatError::MissingField("partition name"));
            }
            if partition.ranges.is_empty() {
                return Err(FormatError::MissingField("block ranges"));
            }
            match (self.layout, &partition.fingerprint) {
                (RecordLayout::WithFingerprint, None) => {
                    return Err(FormatError::MissingField("property id"));
                }
                (RecordLayout::WithFingerprint, Some(fingerprint)) => {
                    if fingerprint.id.is_empty() {
                        return Err(FormatError::MissingField("property id"));
                    }
                    if fingerprint.value.is_empty() {
                        return Err(FormatError::MissingField("fingerprint"));
                    }
                }
                (RecordLayout::Basic, Some(_)) => {
                    return Err(FormatError::UnexpectedFingerprint(partition.name.clone()));
                }
                (RecordLayout::Basic, None) => {}
            }
        }
        Ok(())
    }
}

fn push_field(bytes: &mut Vec<u8>, field: &str) {
    bytes.extend_from_slice(&(field.len() as u32).to_le_bytes());
    bytes.extend_from_slice(field.as_bytes());
}

fn read_field(bytes: &[u8], offset: &mut usize, end: usize) -> Result<String, FormatError> {
    if end - *offset < 4 {
        return Err(FormatError::Truncated { offset: *offset });
    }
    let len = u32::from_le_bytes([
        bytes[*offset],
        bytes[*offset + 1],
        bytes[*offset + 2],
        bytes[*offset + 3],
    ]) as usize;
    *offset += 4;

    if end - *offset < len {
        return Err(FormatError::Truncated { offset: *offset });
    }
    let field = String::from_utf8(bytes[*offset..*offset + len].to_vec())?;
    *offset += len;
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map(layout: RecordLayout) -> CareMap {
        let partitions = match layout {
            RecordLayout::Basic => vec![
                Partition::new("system", "2,0,1"),
                Partition::new("vendor", "4,10,20,30,35"),
            ],
            RecordLayout::WithFingerprint => vec![
                Partition::with_fingerprint("system", "2,0,1", "ro.build.fingerprint", "fp/system"),
                Partition::with_fingerprint("vendor", "4,10,20,30,35", "ro.vendor.build.fingerprint", "fp/vendor"),
            ],
        };
        CareMap { layout, partitions }
    }

    #[test]
    fn test_legacy_decode_basic() {
        let lines = ["system", "RANGES_SYS", "vendor", "RANGES_VEN"];
        let map = CareMap::from_legacy_lines(&lines, RecordLayout::Basic).unwrap();

        assert_eq!(
            map.partitions,
            vec![
                Partition::new("system", "RANGES_SYS"),
                Partition::new("vendor", "RANGES_VEN"),
            ]
        );
        assert_eq!(map.to_legacy().unwrap(), "system\nRANGES_SYS\nvendor\nRANGES_VEN");
    }

    #[test]
    fn test_legacy_decode_with_fingerprint() {
        let lines = ["system", "RANGES_SYS", "ro.build.id", "FP1"];
        let map = CareMap::from_legacy_lines(&lines, RecordLayout::WithFingerprint).unwrap();

        assert_eq!(
            map.partitions,
            vec![Partition::with_fingerprint("system", "RANGES_SYS", "ro.build.id", "FP1")]
        );
        assert_eq!(map.to_legacy().unwrap(), lines.join("\n"));
    }

    #[test]
    fn test_legacy_decode_empty() {
        let map = CareMap::from_legacy_lines(&[], RecordLayout::Basic).unwrap();
        assert!(map.partitions.is_empty());
        assert_eq!(map.to_legacy().unwrap(), "");
    }

    #[test]
    fn test_legacy_rejects_unaligned_line_count() {
        let lines = ["system", "2,0,1", "vendor"];
        assert!(matches!(
            CareMap::from_legacy_lines(&lines, RecordLayout::Basic),
            Err(FormatError::UnalignedLineCount { found: 3, step: 2 })
        ));

        // two lines only hold half a fingerprint record
        assert!(matches!(
            CareMap::from_legacy_lines(&lines[..2], RecordLayout::WithFingerprint),
            Err(FormatError::UnalignedLineCount { found: 2, step: 4 })
        ));
    }

    #[test]
    fn test_legacy_round_trip_both_layouts() {
        for layout in [RecordLayout::Basic, RecordLayout::WithFingerprint] {
            let map = sample_map(layout);
            let text = map.to_legacy().unwrap();
            let lines: Vec<&str> = text.split('\n').collect();
            assert_eq!(CareMap::from_legacy_lines(&lines, layout).unwrap(), map);
        }
    }

    #[test]
    fn test_encode_rejects_empty_name() {
        let map = CareMap {
            layout: RecordLayout::Basic,
            partitions: vec![Partition::new("", "2,0,1")],
        };
        assert!(matches!(
            map.to_legacy(),
            Err(FormatError::MissingField("partition name"))
        ));
        assert!(map.to_bytes().is_err());
    }

    #[test]
    fn test_encode_rejects_missing_fingerprint_fields() {
        let map = CareMap {
            layout: RecordLayout::WithFingerprint,
            partitions: vec![Partition::new("system", "2,0,1")],
        };
        assert!(matches!(
            map.to_legacy(),
            Err(FormatError::MissingField("property id"))
        ));

        let map = CareMap {
            layout: RecordLayout::WithFingerprint,
            partitions: vec![Partition::with_fingerprint("system", "2,0,1", "ro.build.id", "")],
        };
        assert!(matches!(
            map.to_legacy(),
            Err(FormatError::MissingField("fingerprint"))
        ));
    }

    #[test]
    fn test_encode_rejects_fingerprint_under_basic_layout() {
        let map = CareMap {
            layout: RecordLayout::Basic,
            partitions: vec![Partition::with_fingerprint("system", "2,0,1", "ro.build.id", "FP1")],
        };
        assert!(matches!(
            map.to_legacy(),
            Err(FormatError::UnexpectedFingerprint(name)) if name == "system"
        ));
    }

    #[test]
    fn test_binary_round_trip_both_layouts() {
        for layout in [RecordLayout::Basic, RecordLayout::WithFingerprint] {
            let map = sample_map(layout);
            let bytes = map.to_bytes().unwrap();
            assert_eq!(CareMap::from_bytes(&bytes).unwrap(), map);
        }
    }

    #[test]
    fn test_binary_round_trip_empty() {
        let map = CareMap::new(RecordLayout::WithFingerprint);
        let bytes = map.to_bytes().unwrap();
        assert_eq!(bytes.len(), FRAME_OVERHEAD);
        assert_eq!(CareMap::from_bytes(&bytes).unwrap(), map);
    }

    #[test]
    fn test_order_preserved() {
        let map = CareMap {
            layout: RecordLayout::Basic,
            partitions: vec![
                Partition::new("a", "2,0,1"),
                Partition::new("b", "2,1,2"),
                Partition::new("c", "2,2,3"),
            ],
        };

        let names = |map: &CareMap| -> Vec<String> {
            map.partitions.iter().map(|p| p.name.clone()).collect()
        };

        let decoded = CareMap::from_bytes(&map.to_bytes().unwrap()).unwrap();
        assert_eq!(names(&decoded), ["a", "b", "c"]);

        let text = map.to_legacy().unwrap();
        let lines: Vec<&str> = text.split('\n').collect();
        let decoded = CareMap::from_legacy_lines(&lines, RecordLayout::Basic).unwrap();
        assert_eq!(names(&decoded), ["a", "b", "c"]);
    }

    #[test]
    fn test_binary_rejects_truncated_frames() {
        let bytes = sample_map(RecordLayout::WithFingerprint).to_bytes().unwrap();
        for cut in 0..bytes.len() {
            assert!(
                CareMap::from_bytes(&bytes[..cut]).is_err(),
                "prefix of {cut} bytes decoded successfully"
            );
        }
    }

    #[test]
    fn test_binary_rejects_bad_magic() {
        let mut bytes = sample_map(RecordLayout::Basic).to_bytes().unwrap();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            CareMap::from_bytes(&bytes),
            Err(FormatError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_binary_rejects_corrupt_payload() {
        let mut bytes = sample_map(RecordLayout::Basic).to_bytes().unwrap();
        // First byte of the first partition name, after the 7-byte header
        // and the 4-byte field length
        bytes[11] ^= 0xFF;
        assert!(matches!(
            CareMap::from_bytes(&bytes),
            Err(FormatError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_binary_rejects_trailing_bytes() {
        let mut bytes = sample_map(RecordLayout::Basic).to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(
            CareMap::from_bytes(&bytes),
            Err(FormatError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_binary_rejects_empty_required_field() {
        // Hand-built frame: one record whose name field is empty
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&CARE_MAP_MAGIC.to_le_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        push_field(&mut bytes, "");
        push_field(&mut bytes, "2,0,1");
        let crc = CRC16.checksum(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());

        assert!(matches!(
            CareMap::from_bytes(&bytes),
            Err(FormatError::MissingField("partition name"))
        ));
    }

    #[test]
    fn test_binary_rejects_invalid_utf8() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&CARE_MAP_MAGIC.to_le_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0xFF, 0xFE]);
        push_field(&mut bytes, "2,0,1");
        let crc = CRC16.checksum(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());

        assert!(matches!(
            CareMap::from_bytes(&bytes),
            Err(FormatError::InvalidUtf8(_))
        ));
    }
}
