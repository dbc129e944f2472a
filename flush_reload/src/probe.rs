use crate::error::SpyError;
use crate::image::ElfImage;
use crate::MAX_PROBES;
use itertools::Itertools;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

/// A named address to monitor, as printed by `objdump -D` for the victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSpec {
    pub name: char,
    pub virtual_address: u64,
}

impl FromStr for ProbeSpec {
    type Err = SpyError;

    /// Parses `N:0xADDR`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |reason| SpyError::BadProbe {
            text: s.to_owned(),
            reason,
        };
        let (name, address) = s.split_once(':').ok_or_else(|| bad("expected N:0xADDR"))?;
        let mut chars = name.chars();
        let name = match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => c,
            _ => return Err(bad("the name must be a single letter")),
        };
        let hex = address
            .strip_prefix("0x")
            .or_else(|| address.strip_prefix("0X"))
            .ok_or_else(|| bad("the address must start with 0x"))?;
        let virtual_address =
            u64::from_str_radix(hex, 16).map_err(|_| bad("the address is not valid hex"))?;
        if virtual_address == 0 {
            return Err(bad("the address must not be zero"));
        }
        Ok(ProbeSpec {
            name,
            virtual_address,
        })
    }
}

impl fmt::Display for ProbeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.name, self.virtual_address)
    }
}

/// Non-owning handle on one byte of a mapped image.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ProbePointer<'a> {
    ptr: *const u8,
    _image: PhantomData<&'a [u8]>,
}

impl<'a> ProbePointer<'a> {
    pub fn new(byte: &'a u8) -> Self {
        ProbePointer {
            ptr: byte,
            _image: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }
}

impl fmt::Debug for ProbePointer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.ptr)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedProbe<'a> {
    pub name: char,
    pub virtual_address: u64,
    pub pointer: ProbePointer<'a>,
}

/// Between one and `MAX_PROBES` probes with distinct names and addresses,
/// in the order they were given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSet {
    probes: Vec<ProbeSpec>,
}

impl ProbeSet {
    pub fn new(probes: Vec<ProbeSpec>) -> Result<Self, SpyError> {
        if probes.is_empty() {
            return Err(SpyError::NoProbes);
        }
        if probes.len() > MAX_PROBES {
            return Err(SpyError::TooManyProbes {
                count: probes.len(),
            });
        }
        if let Some(name) = probes.iter().map(|p| p.name).duplicates().next() {
            return Err(SpyError::DuplicateName(name));
        }
        if let Some(address) = probes.iter().map(|p| p.virtual_address).duplicates().next() {
            return Err(SpyError::DuplicateAddress(address));
        }
        Ok(ProbeSet { probes })
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeSpec> + '_ {
        self.probes.iter()
    }

    /// Maps every probe to its byte in `image`, loaded at `load_bias`.
    ///
    /// Fails on the first probe outside `[load_bias, load_bias + image.len())`,
    /// in which case nothing is returned.
    pub fn resolve<'a>(
        &self,
        image: &'a [u8],
        load_bias: u64,
    ) -> Result<Vec<ResolvedProbe<'a>>, SpyError> {
        let high = load_bias.saturating_add(image.len() as u64);
        self.probes
            .iter()
            .map(|probe| {
                let out_of_range = || SpyError::OutOfRange {
                    name: probe.name,
                    address: probe.virtual_address,
                    low: load_bias,
                    high,
                };
                let offset = probe
                    .virtual_address
                    .checked_sub(load_bias)
                    .ok_or_else(out_of_range)?;
                let byte = usize::try_from(offset)
                    .ok()
                    .and_then(|offset| image.get(offset))
                    .ok_or_else(out_of_range)?;
                log::debug!(
                    "Probe {} at {:#x} is offset {:#x} in the image",
                    probe.name,
                    probe.virtual_address,
                    offset
                );
                Ok(ResolvedProbe {
                    name: probe.name,
                    virtual_address: probe.virtual_address,
                    pointer: ProbePointer::new(byte),
                })
            })
            .collect()
    }

    pub fn resolve_in<'a>(
        &self,
        image: &'a ElfImage,
    ) -> Result<Vec<ResolvedProbe<'a>>, SpyError> {
        self.resolve(image.bytes(), image.load_bias())
    }
}
