//! Channel catalog and channel collections.
//!
//! A [`Band`] is a bit set over the three sub-bands the radio knows about.
//! The [`ChannelCatalog`] trait turns bands into concrete frequency lists for
//! the current hardware, and [`ChannelCollection`] accumulates scopes from
//! many requests into one bucket scope.

use core::fmt;
use serde::{Deserialize, Serialize};

/// 2.4 GHz channels 1-13, in MHz.
pub const CHANNELS_24_GHZ: [u32; 13] = [
    2412, 2417, 2422, 2427, 2432, 2437, 2442, 2447, 2452, 2457, 2462, 2467, 2472,
];

/// 5 GHz channels that do not require DFS.
pub const CHANNELS_5_GHZ: [u32; 9] = [5180, 5200, 5220, 5240, 5745, 5765, 5785, 5805, 5825];

/// 5 GHz DFS channels.
pub const CHANNELS_5_GHZ_DFS: [u32; 16] = [
    5260, 5280, 5300, 5320, 5500, 5520, 5540, 5560, 5580, 5600, 5620, 5640, 5660, 5680, 5700,
    5720,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Band(pub u8);

impl Band {
    /// No band given; expands to every known frequency.
    pub const UNSPECIFIED: Band = Band(0);
    pub const BAND_24_GHZ: Band = Band(1);
    pub const BAND_5_GHZ: Band = Band(2);
    pub const BAND_5_GHZ_DFS_ONLY: Band = Band(4);
    pub const BAND_5_GHZ_WITH_DFS: Band = Band(6);
    pub const BAND_BOTH: Band = Band(3);
    pub const BAND_BOTH_WITH_DFS: Band = Band(7);

    /// Single-bit sub-bands, in catalog order.
    pub const SUB_BANDS: [Band; 3] = [Band::BAND_24_GHZ, Band::BAND_5_GHZ, Band::BAND_5_GHZ_DFS_ONLY];

    const KNOWN_BITS: u8 = 0b111;

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_unspecified(self) -> bool {
        self.0 == 0
    }

    /// True when the band carries bits this catalog has no sub-band for.
    pub fn is_unknown(self) -> bool {
        self.0 & !Self::KNOWN_BITS != 0
    }

    pub fn contains(self, other: Band) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn sub_bands(self) -> impl Iterator<Item = Band> {
        Self::SUB_BANDS.into_iter().filter(move |b| self.contains(*b))
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Band::UNSPECIFIED => write!(f, "unspecified"),
            Band::BAND_24_GHZ => write!(f, "2.4GHz"),
            Band::BAND_5_GHZ => write!(f, "5GHz"),
            Band::BAND_5_GHZ_DFS_ONLY => write!(f, "5GHz-DFS"),
            Band::BAND_5_GHZ_WITH_DFS => write!(f, "5GHz+DFS"),
            Band::BAND_BOTH => write!(f, "2.4GHz+5GHz"),
            Band::BAND_BOTH_WITH_DFS => write!(f, "2.4GHz+5GHz+DFS"),
            Band(bits) => write!(f, "band(0x{:02x})", bits),
        }
    }
}

/// What a request (or a bucket) wants scanned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanScope {
    Band(Band),
    Channels(alloc::vec::Vec<u32>),
}

impl ScanScope {
    pub fn is_band(&self) -> bool {
        matches!(self, ScanScope::Band(_))
    }
}

impl fmt::Display for ScanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanScope::Band(band) => write!(f, "{}", band),
            ScanScope::Channels(channels) => {
                write!(f, "[")?;
                for (i, freq) in channels.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", freq)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Hardware knowledge of which frequencies exist per band.
pub trait ChannelCatalog: fmt::Debug {
    /// Frequencies for a single sub-band bit. Anything else yields an empty slice.
    fn sub_band_channels(&self, sub_band: Band) -> &[u32];

    fn expand_band(&self, band: Band) -> alloc::vec::Vec<u32> {
        if band.is_unknown() {
            return alloc::vec::Vec::new();
        }
        let band = if band.is_unspecified() { Band::BAND_BOTH_WITH_DFS } else { band };
        band.sub_bands()
            .flat_map(|sub_band| self.sub_band_channels(sub_band).iter().copied())
            .collect()
    }

    fn all_frequencies(&self) -> alloc::vec::Vec<u32> {
        self.expand_band(Band::BAND_BOTH_WITH_DFS)
    }

    /// Concrete frequencies for a scope, de-duplicated, first occurrence wins.
    fn expand(&self, scope: &ScanScope) -> alloc::vec::Vec<u32> {
        match scope {
            ScanScope::Band(band) => self.expand_band(*band),
            ScanScope::Channels(channels) => {
                let mut out = alloc::vec::Vec::with_capacity(channels.len());
                for &freq in channels {
                    if !out.contains(&freq) {
                        out.push(freq);
                    }
                }
                out
            }
        }
    }

    /// Sub-band a frequency belongs to, or `UNSPECIFIED` when none.
    fn band_of(&self, freq: u32) -> Band {
        Band::SUB_BANDS
            .into_iter()
            .find(|sub_band| self.sub_band_channels(*sub_band).contains(&freq))
            .unwrap_or(Band::UNSPECIFIED)
    }
}

/// Catalog backed by fixed per-sub-band tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownBandsCatalog {
    band_24_ghz: alloc::vec::Vec<u32>,
    band_5_ghz: alloc::vec::Vec<u32>,
    band_5_ghz_dfs: alloc::vec::Vec<u32>,
}

impl KnownBandsCatalog {
    pub fn new() -> Self {
        Self::from_tables(&CHANNELS_24_GHZ, &CHANNELS_5_GHZ, &CHANNELS_5_GHZ_DFS)
    }

    pub fn from_tables(band_24_ghz: &[u32], band_5_ghz: &[u32], band_5_ghz_dfs: &[u32]) -> Self {
        Self {
            band_24_ghz: band_24_ghz.to_vec(),
            band_5_ghz: band_5_ghz.to_vec(),
            band_5_ghz_dfs: band_5_ghz_dfs.to_vec(),
        }
    }
}

impl Default for KnownBandsCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelCatalog for KnownBandsCatalog {
    fn sub_band_channels(&self, sub_band: Band) -> &[u32] {
        match sub_band {
            Band::BAND_24_GHZ => &self.band_24_ghz,
            Band::BAND_5_GHZ => &self.band_5_ghz,
            Band::BAND_5_GHZ_DFS_ONLY => &self.band_5_ghz_dfs,
            _ => &[],
        }
    }
}

/// Insertion-ordered set of frequencies gathered from one or more scopes.
///
/// Re-adding a frequency keeps its original position, so the front of the
/// collection is always the least recently added channel.
#[derive(Debug, Clone)]
pub struct ChannelCollection<'c> {
    catalog: &'c dyn ChannelCatalog,
    channels: alloc::vec::Vec<u32>,
}

impl<'c> ChannelCollection<'c> {
    pub fn new(catalog: &'c dyn ChannelCatalog) -> Self {
        Self {
            catalog,
            channels: alloc::vec::Vec::new(),
        }
    }

    /// Returns true when the frequency was not already present.
    pub fn add_channel(&mut self, freq: u32) -> bool {
        if self.channels.contains(&freq) {
            return false;
        }
        self.channels.push(freq);
        true
    }

    pub fn add_band(&mut self, band: Band) {
        for freq in self.catalog.expand_band(band) {
            self.add_channel(freq);
        }
    }

    pub fn add_scope(&mut self, scope: &ScanScope) {
        match scope {
            ScanScope::Band(band) => self.add_band(*band),
            ScanScope::Channels(channels) => {
                for &freq in channels {
                    self.add_channel(freq);
                }
            }
        }
    }

    pub fn merge(&mut self, other: &ChannelCollection<'_>) {
        for &freq in &other.channels {
            self.add_channel(freq);
        }
    }

    pub fn contains_channel(&self, freq: u32) -> bool {
        self.channels.contains(&freq)
    }

    /// True when every frequency of `band` is present.
    pub fn contains_band(&self, band: Band) -> bool {
        let expanded = self.catalog.expand_band(band);
        !expanded.is_empty() && expanded.iter().all(|freq| self.channels.contains(freq))
    }

    /// Count of channels present once `other` were merged in.
    pub fn union_count(&self, other: &ChannelCollection<'_>) -> usize {
        self.channels.len()
            + other
                .channels
                .iter()
                .filter(|freq| !self.channels.contains(freq))
                .count()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn frequencies(&self) -> &[u32] {
        &self.channels
    }

    /// Removes and returns the least recently added channel.
    pub fn drop_oldest(&mut self) -> Option<u32> {
        if self.channels.is_empty() {
            None
        } else {
            Some(self.channels.remove(0))
        }
    }

    /// Sub-bands whose every channel is present.
    pub fn covered_bands(&self) -> Band {
        let bits = Band::SUB_BANDS
            .into_iter()
            .filter(|sub_band| {
                let table = self.catalog.sub_band_channels(*sub_band);
                !table.is_empty() && table.iter().all(|freq| self.channels.contains(freq))
            })
            .fold(0u8, |acc, sub_band| acc | sub_band.bits());
        Band(bits)
    }

    /// Renders the collection as a band when it is exactly a band expansion,
    /// otherwise as the explicit channel list in insertion order.
    pub fn to_scope(&self) -> ScanScope {
        let covered = self.covered_bands();
        if !covered.is_unspecified()
            && self.catalog.expand_band(covered).len() == self.channels.len()
        {
            ScanScope::Band(covered)
        } else {
            ScanScope::Channels(self.channels.clone())
        }
    }
}
