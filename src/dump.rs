//! System dump header codec
//!
//! The header sits at the front of a configuration dump taken from the
//! array's system LUN. All fields are little-endian:
//!
//! ```text
//! magic "FBESYSDP" | version u32 | header_size u32
//! object/edge/user/system-NP entry counts and sizes, 8 x u32
//! 5 x section { state u32, offset u64, size u64 }
//! end mask u32 (0xFBE5_1DED)
//! ```

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

pub const DUMP_MAGIC: &[u8; 8] = b"FBESYSDP";
pub const DUMP_END_MASK: u32 = 0xFBE5_1DED;
pub const DUMP_HEADER_VERSION: u32 = 1;

const SECTION_LEN: usize = 4 + 8 + 8;

/// Encoded length of [`SystemDumpHeader`]
pub const DUMP_HEADER_LEN: usize = 8 + 4 + 4 + 8 * 4 + DumpSection::COUNT * SECTION_LEN + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionState {
    #[default]
    Empty,
    Valid,
    Corrupt,
}

impl SectionState {
    fn to_wire(self) -> u32 {
        match self {
            SectionState::Empty => 0,
            SectionState::Valid => 1,
            SectionState::Corrupt => 2,
        }
    }

    fn from_wire(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(SectionState::Empty),
            1 => Ok(SectionState::Valid),
            2 => Ok(SectionState::Corrupt),
            other => Err(Error::DumpDecode(format!("unknown section state {}", other))),
        }
    }
}

/// Sections of a dump, in header order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpSection {
    DatabaseHeader,
    Database,
    UserConfig,
    SystemNonPaged,
    UserNonPaged,
}

impl DumpSection {
    pub const COUNT: usize = 5;

    pub const ALL: [DumpSection; Self::COUNT] = [
        DumpSection::DatabaseHeader,
        DumpSection::Database,
        DumpSection::UserConfig,
        DumpSection::SystemNonPaged,
        DumpSection::UserNonPaged,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SectionDescriptor {
    pub state: SectionState,
    pub offset: u64,
    pub size: u64,
}

/// Per-kind entry count and entry size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryTable {
    pub count: u32,
    pub entry_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemDumpHeader {
    pub version: u32,
    pub objects: EntryTable,
    pub edges: EntryTable,
    pub users: EntryTable,
    pub system_non_paged: EntryTable,
    pub sections: [SectionDescriptor; DumpSection::COUNT],
}

impl Default for SystemDumpHeader {
    fn default() -> Self {
        Self {
            version: DUMP_HEADER_VERSION,
            objects: EntryTable::default(),
            edges: EntryTable::default(),
            users: EntryTable::default(),
            system_non_paged: EntryTable::default(),
            sections: [SectionDescriptor::default(); DumpSection::COUNT],
        }
    }
}

impl SystemDumpHeader {
    pub fn section(&self, section: DumpSection) -> &SectionDescriptor {
        &self.sections[section.index()]
    }

    pub fn set_section(&mut self, section: DumpSection, descriptor: SectionDescriptor) {
        self.sections[section.index()] = descriptor;
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DUMP_HEADER_LEN);
        buf.put_slice(DUMP_MAGIC);
        buf.put_u32_le(self.version);
        buf.put_u32_le(DUMP_HEADER_LEN as u32);
        for table in [self.objects, self.edges, self.users, self.system_non_paged] {
            buf.put_u32_le(table.count);
            buf.put_u32_le(table.entry_size);
        }
        for section in &self.sections {
            buf.put_u32_le(section.state.to_wire());
            buf.put_u64_le(section.offset);
            buf.put_u64_le(section.size);
        }
        buf.put_u32_le(DUMP_END_MASK);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self> {
        if buf.remaining() < DUMP_HEADER_LEN {
            return Err(Error::DumpDecode(format!(
                "header needs {} bytes, got {}",
                DUMP_HEADER_LEN,
                buf.remaining()
            )));
        }

        let mut magic = [0u8; 8];
        buf.copy_to_slice(&mut magic);
        if &magic != DUMP_MAGIC {
            return Err(Error::DumpDecode(format!(
                "bad magic {:?}",
                String::from_utf8_lossy(&magic)
            )));
        }

        let version = buf.get_u32_le();
        let header_size = buf.get_u32_le();
        if header_size as usize != DUMP_HEADER_LEN {
            return Err(Error::DumpDecode(format!(
                "header size {} does not match {}",
                header_size, DUMP_HEADER_LEN
            )));
        }

        let mut table = || EntryTable {
            count: buf.get_u32_le(),
            entry_size: buf.get_u32_le(),
        };
        let objects = table();
        let edges = table();
        let users = table();
        let system_non_paged = table();

        let mut sections = [SectionDescriptor::default(); DumpSection::COUNT];
        for section in sections.iter_mut() {
            *section = SectionDescriptor {
                state: SectionState::from_wire(buf.get_u32_le())?,
                offset: buf.get_u64_le(),
                size: buf.get_u64_le(),
            };
        }

        let end_mask = buf.get_u32_le();
        if end_mask != DUMP_END_MASK {
            return Err(Error::DumpDecode(format!("missing end mask, found {:#x}", end_mask)));
        }

        Ok(Self {
            version,
            objects,
            edges,
            users,
            system_non_paged,
            sections,
        })
    }
}
