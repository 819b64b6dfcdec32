//! PTE size classification
//!
//! Maps a requested page size to the class of page-table entries the backing
//! block has to be mapped with. Blocks inside one PDE region must agree on the
//! class, so the allocator uses this to keep small and big page mappings apart.

/// Small page size every GPU address space supports.
pub const DEFAULT_SMALL_PAGE_SIZE: u64 = 0x1000;

/// Page-table-entry size class of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PteClass {
    /// Not committed to any page size yet.
    #[default]
    Any,
    Small,
    Big,
    Huge,
}

impl PteClass {
    /// Two classes conflict when both are committed and differ.
    pub const fn conflicts_with(self, other: PteClass) -> bool {
        !matches!(self, PteClass::Any)
            && !matches!(other, PteClass::Any)
            && self as u8 != other as u8
    }
}

/// The owning GPU address space.
///
/// Supplies the page sizes the allocator classifies requests against and the
/// range covered by one page directory entry.
pub trait AddressSpace {
    /// Size of a small page.
    fn small_page_size(&self) -> u64 {
        DEFAULT_SMALL_PAGE_SIZE
    }

    /// Size of a big page, `None` when big pages are disabled.
    fn big_page_size(&self) -> Option<u64>;

    /// Size of a huge page, `None` when unsupported.
    fn huge_page_size(&self) -> Option<u64> {
        None
    }

    /// Bytes of address space governed by one PDE.
    fn pde_coverage(&self) -> u64;
}

/// Page sizes captured from an [`AddressSpace`] at init time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizes {
    pub small: u64,
    pub big: Option<u64>,
    pub huge: Option<u64>,
    pub pde_coverage: u64,
}

impl PageSizes {
    pub fn from_address_space(aspace: &dyn AddressSpace) -> Self {
        Self {
            small: aspace.small_page_size(),
            big: aspace.big_page_size(),
            huge: aspace.huge_page_size(),
            pde_coverage: aspace.pde_coverage(),
        }
    }

    pub const fn big_pages(&self) -> bool {
        self.big.is_some()
    }

    /// Classify `page_size`; `None` means the size is not supported.
    pub fn classify(&self, page_size: u64) -> Option<PteClass> {
        if Some(page_size) == self.big {
            Some(PteClass::Big)
        } else if page_size == self.small {
            Some(PteClass::Small)
        } else if Some(page_size) == self.huge {
            Some(PteClass::Huge)
        } else {
            None
        }
    }
}

impl AddressSpace for PageSizes {
    fn small_page_size(&self) -> u64 {
        self.small
    }

    fn big_page_size(&self) -> Option<u64> {
        self.big
    }

    fn huge_page_size(&self) -> Option<u64> {
        self.huge
    }

    fn pde_coverage(&self) -> u64 {
        self.pde_coverage
    }
}
