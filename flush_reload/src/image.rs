use cache_utils::mmap::MMappedFile;
use object::elf::{FileHeader32, FileHeader64, ET_CORE, ET_DYN, ET_EXEC, ET_NONE, ET_REL};
use object::read::elf::FileHeader;
use object::{Endianness, FileKind};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Conventional link addresses of position dependent executables.
pub const ELF32_EXEC_LOAD_ADDRESS: u64 = 0x0804_8000;
pub const ELF64_EXEC_LOAD_ADDRESS: u64 = 0x0040_0000;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("couldn't open the ELF at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("the ELF file is empty")]
    Empty,
    #[error("not an ELF file")]
    NotElf,
    #[error("error parsing ELF header: {0}")]
    Parse(#[from] object::Error),
    #[error("unsupported ELF type: {0}")]
    UnsupportedType(&'static str),
    #[error("unknown ELF type: {0}")]
    UnknownType(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl fmt::Display for ElfClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElfClass::Elf32 => write!(f, "32-bit"),
            ElfClass::Elf64 => write!(f, "64-bit"),
        }
    }
}

/// Reads the class and `e_type` out of an ELF header.
pub fn classify(data: &[u8]) -> Result<(ElfClass, u16), ImageError> {
    match FileKind::parse(data) {
        Ok(FileKind::Elf32) => {
            let header = FileHeader32::<Endianness>::parse(data)?;
            let endian = header.endian()?;
            Ok((ElfClass::Elf32, header.e_type(endian)))
        }
        Ok(FileKind::Elf64) => {
            let header = FileHeader64::<Endianness>::parse(data)?;
            let endian = header.endian()?;
            Ok((ElfClass::Elf64, header.e_type(endian)))
        }
        _ => Err(ImageError::NotElf),
    }
}

/// Address the first byte of the file is loaded at, as seen in the addresses
/// `objdump` prints for this image.
pub fn load_bias(class: ElfClass, e_type: u16) -> Result<u64, ImageError> {
    match e_type {
        ET_EXEC => Ok(match class {
            ElfClass::Elf32 => ELF32_EXEC_LOAD_ADDRESS,
            ElfClass::Elf64 => ELF64_EXEC_LOAD_ADDRESS,
        }),
        // Objdump addresses are relative to the start of the file.
        ET_DYN => Ok(0),
        ET_NONE => Err(ImageError::UnsupportedType("none")),
        ET_REL => Err(ImageError::UnsupportedType("relocatable")),
        ET_CORE => Err(ImageError::UnsupportedType("core")),
        other => Err(ImageError::UnknownType(other)),
    }
}

/// Victim binary mapped read-only, with the load bias of its addresses.
pub struct ElfImage {
    map: MMappedFile,
    class: ElfClass,
    load_bias: u64,
}

impl ElfImage {
    pub fn open(path: &Path) -> Result<ElfImage, ImageError> {
        let map = MMappedFile::open(path).map_err(|source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if map.is_empty() {
            return Err(ImageError::Empty);
        }
        let (class, e_type) = classify(map.slice())?;
        let load_bias = load_bias(class, e_type)?;
        if e_type == ET_DYN {
            log::info!("Detected ELF type: Shared Object ({})", class);
        } else {
            log::info!("Detected {} executable, load address {:#x}", class, load_bias);
        }
        Ok(ElfImage {
            map,
            class,
            load_bias,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        self.map.slice()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn class(&self) -> ElfClass {
        self.class
    }

    pub fn load_bias(&self) -> u64 {
        self.load_bias
    }
}

impl fmt::Debug for ElfImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElfImage")
            .field("base", &self.map.as_ptr())
            .field("len", &self.map.len())
            .field("class", &self.class)
            .field("load_bias", &self.load_bias)
            .finish()
    }
}

/// Little endian ELF header of the given class and type, zero padded to `size` bytes.
#[cfg(test)]
pub(crate) fn synthetic_elf(class: ElfClass, e_type: u16, size: usize) -> Vec<u8> {
    let (class_byte, machine, header_len): (u8, u16, usize) = match class {
        ElfClass::Elf32 => (1, 3, 52),
        ElfClass::Elf64 => (2, 62, 64),
    };
    let mut data = vec![0u8; size.max(header_len)];
    data[0..4].copy_from_slice(b"\x7fELF");
    data[4] = class_byte;
    data[5] = 1; // ELFDATA2LSB
    data[6] = 1; // EV_CURRENT
    data[16..18].copy_from_slice(&e_type.to_le_bytes());
    data[18..20].copy_from_slice(&machine.to_le_bytes());
    data[20..24].copy_from_slice(&1u32.to_le_bytes());
    data
}
