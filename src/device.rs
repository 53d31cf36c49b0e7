//! Chip family profiles
//!
//! Memory geometry and bootloader quirks per product ID, based on AN2606
//! ("Device-dependent bootloader parameters") and the reference manuals.
//! The table is plain read-only data; [`ProfileTable`] is handed to the
//! programmer at construction so alternative tables can be injected.

use bitflags::bitflags;

use self::Family::*;
use self::PageLayout::{Sectors, Uniform};

const KB: u32 = 1024;

bitflags! {
    /// Device specific bootloader quirks
    pub struct DeviceFlags: u8 {
        /// Option byte changes take effect through OBL_LAUNCH
        const OBL_LAUNCH = 1;
        /// PEMPTY must be cleared after flashing an empty device
        const CLEAR_PEMPTY = 2;
        /// UID and flash size can only be read as part of a full
        /// transfer-size block
        const LONG_UID_ACCESS = 8;
        /// Bootloader runs without parity
        const FORCE_PARITY_NONE = 16;
    }
}

/// Half-open address range
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub start: u32,
    pub end: u32,
}

impl Region {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn size(&self) -> u32 {
        self.end - self.start
    }

    /// Whether `[address, address + length)` lies entirely in this region
    pub fn contains(&self, address: u32, length: usize) -> bool {
        let end = address as u64 + length as u64;
        address >= self.start && end <= self.end as u64
    }
}

/// Flash page (or sector) geometry
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageLayout {
    Uniform(u32),
    /// Sector sizes in order, the last one repeats up to the end of flash
    Sectors(&'static [u32]),
}

impl PageLayout {
    pub fn smallest(&self) -> u32 {
        match self {
            PageLayout::Uniform(size) => *size,
            PageLayout::Sectors(sizes) => sizes.iter().copied().min().unwrap_or(0),
        }
    }

    fn size_of(&self, index: usize) -> u32 {
        match self {
            PageLayout::Uniform(size) => *size,
            PageLayout::Sectors(sizes) => sizes
                .get(index)
                .or_else(|| sizes.last())
                .copied()
                .unwrap_or(0),
        }
    }
}

const F2_F4_SECTORS: &[u32] = &[16 * KB, 16 * KB, 16 * KB, 16 * KB, 64 * KB, 128 * KB];
const F4_DUAL_BANK_SECTORS: &[u32] = &[
    16 * KB, 16 * KB, 16 * KB, 16 * KB, 64 * KB, 128 * KB, 128 * KB, 128 * KB, 128 * KB, 128 * KB, 128 * KB, 128 * KB,
    16 * KB, 16 * KB, 16 * KB, 16 * KB, 64 * KB, 128 * KB,
];
const F7_SECTORS: &[u32] = &[32 * KB, 32 * KB, 32 * KB, 32 * KB, 128 * KB, 256 * KB];

/// One erasable flash page
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Page {
    pub index: u32,
    pub address: u32,
    pub size: u32,
}

impl Page {
    pub fn end(&self) -> u32 {
        self.address + self.size
    }
}

/// Main flash array
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Flash {
    pub region: Region,
    pub pages: PageLayout,
}

impl Flash {
    pub const fn new(start: u32, end: u32, pages: PageLayout) -> Self {
        Self { region: Region::new(start, end), pages }
    }

    /// Pages covering the whole array, in address order
    pub fn pages(&self) -> Pages {
        Pages { flash: *self, index: 0, address: self.region.start }
    }
}

/// Iterator over the pages of a [`Flash`]
#[derive(Clone, Debug)]
pub struct Pages {
    flash: Flash,
    index: usize,
    address: u32,
}

impl Iterator for Pages {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        if self.address >= self.flash.region.end {
            return None;
        }

        let size = self.flash.pages.size_of(self.index);
        if size == 0 {
            return None;
        }

        let page = Page { index: self.index as u32, address: self.address, size };
        self.index += 1;
        self.address = self.address.saturating_add(size);

        Some(page)
    }
}

/// Device families, carrying the parameters shared by their members
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Family {
    F0,
    F1,
    F2,
    F3,
    F4,
    F7,
    G0,
    G4,
    H7,
    L0,
    L1,
    L4,
    L5,
    WB,
    WL,
    U5,
    W,
    /// ST BlueNRG
    NRG,
    /// Conservative defaults for devices missing from the table
    Generic,
}

impl Family {
    pub fn uid_address(self) -> Option<u32> {
        match self {
            Family::F1 => Some(0x1FFF_F7E8),
            Family::F3 => Some(0x1FFF_F7AC),
            Family::F4 => Some(0x1FFF_7A10),
            Family::F7 => Some(0x1FF0_F420),
            Family::G0 | Family::L4 | Family::WL => Some(0x1FFF_7590),
            Family::H7 => Some(0x1FF1_E800),
            Family::L0 => Some(0x1FF8_0050),
            _ => None,
        }
    }

    pub fn flash_size_address(self) -> Option<u32> {
        match self {
            Family::F0 | Family::F3 => Some(0x1FFF_F7CC),
            Family::F1 => Some(0x1FFF_F7E0),
            Family::F4 => Some(0x1FFF_7A22),
            Family::F7 => Some(0x1FF0_F442),
            Family::G0 | Family::L4 | Family::WL => Some(0x1FFF_75E0),
            Family::H7 => Some(0x1FF1_E880),
            Family::L0 => Some(0x1FF8_007C),
            _ => None,
        }
    }

    /// Largest Read/Write Memory payload accepted by the bootloader
    pub fn transfer_size(self) -> usize {
        match self {
            Family::L0 => 128,
            _ => 256,
        }
    }

    /// Whether a global erase is accepted, otherwise flash is erased page by page
    pub fn mass_erase(self) -> bool {
        !matches!(self, Family::L0 | Family::L1)
    }

    /// Whether the bootloader generation is expected to use Extended Erase
    pub fn extended_erase(self) -> bool {
        !matches!(self, Family::F0 | Family::F1 | Family::W | Family::NRG | Family::Generic)
    }

    pub fn bootloader_id_address(self) -> Option<u32> {
        match self {
            Family::F2 => Some(0x1FFF_77DE),
            Family::F3 => Some(0x1FFF_F796),
            Family::F4 => Some(0x1FFF_76DE),
            Family::F7 => Some(0x1FF0_EDBE),
            Family::G4 | Family::L4 => Some(0x1FFF_6FFE),
            _ => None,
        }
    }

    pub fn flags(self) -> DeviceFlags {
        match self {
            Family::F4 | Family::L0 => DeviceFlags::LONG_UID_ACCESS,
            Family::NRG => DeviceFlags::FORCE_PARITY_NONE,
            _ => DeviceFlags::empty(),
        }
    }
}

/// Erase command flavour, fixed once the device and its bootloader are known
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EraseStrategy {
    /// Erase (0x43), one byte page numbers
    Legacy,
    /// Extended Erase (0x44), two byte page numbers
    Extended,
}

impl EraseStrategy {
    /// Pick the erase command from what the bootloader advertises, using the
    /// profile to break the tie when both are available
    pub fn resolve(profile: &Profile, legacy: bool, extended: bool) -> Option<Self> {
        match (legacy, extended) {
            (true, true) if profile.extended_erase() => Some(EraseStrategy::Extended),
            (true, _) => Some(EraseStrategy::Legacy),
            (false, true) => Some(EraseStrategy::Extended),
            (false, false) => None,
        }
    }

    /// Maximum page numbers per erase command
    pub fn max_pages(self) -> usize {
        match self {
            EraseStrategy::Legacy => crate::protocol::MAX_LEGACY_ERASE_PAGES,
            EraseStrategy::Extended => crate::protocol::MAX_EXTENDED_ERASE_PAGES,
        }
    }

    /// Highest page number the command can encode
    pub fn max_page_index(self) -> u32 {
        match self {
            EraseStrategy::Legacy => 0xFF,
            EraseStrategy::Extended => 0xFFEF,
        }
    }
}

/// Largest plan chunk for writes, bounded so progress stays responsive
const MAX_WRITE_CHUNK: u32 = 16 * KB;

/// Memory map and quirks of one device
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Profile {
    pub name: &'static str,
    pub family: Family,
    pub product_id: u16,
    pub bootloader_id: Option<u8>,
    pub flash: Flash,
    pub ram: &'static [Region],
    pub system: &'static [Region],
    pub option_bytes: Option<Region>,
    pub bootloader_id_address: Option<u32>,
    pub flags: DeviceFlags,
}

impl Profile {
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        family: Family,
        name: &'static str,
        product_id: u16,
        bootloader_id: Option<u8>,
        ram: &'static [Region],
        system: &'static [Region],
        flash: Flash,
        option_bytes: Option<Region>,
        bootloader_id_address: Option<u32>,
        flags: DeviceFlags,
    ) -> Self {
        Self {
            name,
            family,
            product_id,
            bootloader_id,
            flash,
            ram,
            system,
            option_bytes,
            bootloader_id_address,
            flags,
        }
    }

    /// Conservative profile for a device missing from the table, with
    /// caller supplied flash size and 1 KiB pages
    ///
    /// Returns `None` when the flash would extend past the address space.
    pub fn generic(product_id: u16, flash_size: u32) -> Option<Self> {
        const BASE: u32 = 0x0800_0000;
        let end = BASE.checked_add(flash_size)?;

        Some(Self::new(
            Family::Generic,
            "generic",
            product_id,
            None,
            &[],
            &[],
            Flash::new(BASE, end, PageLayout::Uniform(KB)),
            None,
            None,
            DeviceFlags::empty(),
        ))
    }

    pub fn flash_base(&self) -> u32 {
        self.flash.region.start
    }

    pub fn flash_size(&self) -> u32 {
        self.flash.region.size()
    }

    pub fn page_layout(&self) -> PageLayout {
        self.flash.pages
    }

    pub fn extended_erase(&self) -> bool {
        self.family.extended_erase()
    }

    pub fn mass_erase(&self) -> bool {
        self.family.mass_erase()
    }

    pub fn max_read_chunk(&self) -> usize {
        self.family.transfer_size()
    }

    /// Wire limit for a single Write Memory command
    pub fn max_transfer(&self) -> usize {
        self.family.transfer_size()
    }

    /// Plan chunk size for writes: the smallest page, within bounds
    pub fn max_write_chunk(&self) -> usize {
        let transfer = self.family.transfer_size() as u32;
        self.flash.pages.smallest().max(transfer).min(MAX_WRITE_CHUNK) as usize
    }

    pub fn flags(&self) -> DeviceFlags {
        self.flags | self.family.flags()
    }

    pub fn bootloader_id_address(&self) -> Option<u32> {
        self.bootloader_id_address.or_else(|| self.family.bootloader_id_address())
    }

    pub fn uid_address(&self) -> Option<u32> {
        self.family.uid_address()
    }

    pub fn flash_size_address(&self) -> Option<u32> {
        self.family.flash_size_address()
    }

    /// Transfer-size block holding the UID and flash size registers, for
    /// devices that only answer full block reads there
    pub fn register_block(&self) -> Option<Region> {
        if !self.flags().contains(DeviceFlags::LONG_UID_ACCESS) {
            return None;
        }
        self.uid_address().map(|a| {
            let base = a & 0xFFFF_FF00;
            Region::new(base, base + self.family.transfer_size() as u32)
        })
    }

    /// Whether `[address, address + length)` may be accessed through the
    /// bootloader (flash, RAM, system memory, option bytes or ID registers)
    pub fn contains(&self, address: u32, length: usize) -> bool {
        let registers = [
            self.uid_address().map(|a| Region::new(a, a + 12)),
            self.flash_size_address().map(|a| Region::new(a, a + 2)),
            self.bootloader_id_address().map(|a| Region::new(a, a + 1)),
            self.register_block(),
        ];

        self.flash.region.contains(address, length)
            || self.ram.iter().any(|r| r.contains(address, length))
            || self.system.iter().any(|r| r.contains(address, length))
            || self.option_bytes.map(|r| r.contains(address, length)).unwrap_or(false)
            || registers.iter().flatten().any(|r| r.contains(address, length))
    }

    /// Whether execution may be started at `address`
    pub fn is_executable(&self, address: u32) -> bool {
        self.flash.region.contains(address, 1) || self.ram.iter().any(|r| r.contains(address, 1))
    }
}

/// Read-only device table
#[derive(Copy, Clone, Debug)]
pub struct ProfileTable {
    profiles: &'static [Profile],
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileTable {
    pub const fn new(profiles: &'static [Profile]) -> Self {
        Self { profiles }
    }

    /// Devices known to this crate
    pub fn builtin() -> Self {
        Self::new(DEVICES)
    }

    pub fn profiles(&self) -> &'static [Profile] {
        self.profiles
    }

    /// Whether several entries share `product_id`, so that the bootloader ID
    /// is needed to tell them apart
    pub fn has_variants(&self, product_id: u16) -> bool {
        self.profiles.iter().filter(|p| p.product_id == product_id).count() > 1
    }

    /// First profile registered for `product_id`
    pub fn lookup(&self, product_id: u16) -> Option<&'static Profile> {
        self.profiles.iter().find(|p| p.product_id == product_id)
    }

    /// Look up a device, refined by its bootloader ID where known
    ///
    /// `None` means the device is not in the table; the caller decides
    /// whether to continue with [`Profile::generic`].
    pub fn profile_for(&self, product_id: u16, bootloader_id: Option<u8>) -> Option<&'static Profile> {
        let exact = bootloader_id.and_then(|bid| {
            self.profiles
                .iter()
                .find(|p| p.product_id == product_id && p.bootloader_id == Some(bid))
        });

        exact.or_else(|| self.lookup(product_id))
    }
}

/// Byte order of the UID groups as printed by ST tooling
const UID_GROUPS: [&[usize]; 4] = [&[1, 0], &[3, 2], &[7, 6, 5, 4], &[11, 10, 9, 8]];

/// Render a 96-bit unique ID as `XXXX-XXXX-XXXXXXXX-XXXXXXXX`
pub fn format_uid(uid: &[u8; 12]) -> String {
    UID_GROUPS
        .iter()
        .map(|group| group.iter().map(|&i| format!("{:02X}", uid[i])).collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

const F1_SYSTEM: &[Region] = &[Region::new(0x1FFF_F000, 0x1FFF_F800)];
const F1_OPTION: Option<Region> = Some(Region::new(0x1FFF_F800, 0x1FFF_F810));
const F0_OPTION: Option<Region> = F1_OPTION;
const F3_SYSTEM: &[Region] = &[Region::new(0x1FFF_D800, 0x1FFF_F800)];
const F2_F4_SYSTEM: &[Region] = &[Region::new(0x1FFF_0000, 0x1FFF_7800)];
const F2_F4_OPTION: Option<Region> = Some(Region::new(0x1FFF_C000, 0x1FFF_C010));
const F4_DUAL_OPTION: Option<Region> = Some(Region::new(0x1FFE_C000, 0x1FFF_C010));
const F7_SYSTEM: &[Region] = &[Region::new(0x1FF0_0000, 0x1FF0_EDC0)];
const F7_OPTION: Option<Region> = Some(Region::new(0x1FFF_0000, 0x1FFF_0020));
const G_SYSTEM: &[Region] = &[Region::new(0x1FFF_0000, 0x1FFF_7000)];
const G0_OPTION: Option<Region> = Some(Region::new(0x1FFF_7800, 0x1FFF_7880));
const G4_OPTION: Option<Region> = Some(Region::new(0x1FFF_7800, 0x1FFF_7830));
const H7_SYSTEM: &[Region] = &[Region::new(0x1FF0_0000, 0x1FF1_E800)];
const L0_SYSTEM: &[Region] = &[Region::new(0x1FF0_0000, 0x1FF0_1000)];
const L0_L1_OPTION: Option<Region> = Some(Region::new(0x1FF8_0000, 0x1FF8_0020));
const L1_SYSTEM: &[Region] = &[Region::new(0x1FF0_0000, 0x1FF0_2000)];
const L4_OPTION: Option<Region> = Some(Region::new(0x1FFF_7800, 0x1FFF_7810));
const NRG_SYSTEM: &[Region] = &[Region::new(0x1000_0000, 0x1000_0800)];
const NRG_LP_SYSTEM: &[Region] = &[Region::new(0x1000_0000, 0x1000_1800)];

const NONE: DeviceFlags = DeviceFlags::empty();

/// Built-in device table
#[rustfmt::skip]
pub static DEVICES: &[Profile] = &[
    Profile::new(F0, "STM32F05xxx/030x8", 0x440, Some(0x21), &[Region::new(0x2000_0800, 0x2000_2000)], &[Region::new(0x1FFF_EC00, 0x1FFF_F800)], Flash::new(0x0800_0000, 0x0801_0000, Uniform(KB)), F0_OPTION, Some(0x1FFF_F7A6), NONE),
    Profile::new(F0, "STM32F03xx4/6", 0x444, Some(0x10), &[Region::new(0x2000_0800, 0x2000_1000)], &[Region::new(0x1FFF_EC00, 0x1FFF_F800)], Flash::new(0x0800_0000, 0x0800_8000, Uniform(KB)), F0_OPTION, Some(0x1FFF_F7A6), NONE),
    Profile::new(F0, "STM32F030xC", 0x442, Some(0x52), &[Region::new(0x2000_1800, 0x2000_8000)], &[Region::new(0x1FFF_D800, 0x1FFF_F800)], Flash::new(0x0800_0000, 0x0804_0000, Uniform(2 * KB)), F0_OPTION, Some(0x1FFF_F796), DeviceFlags::OBL_LAUNCH),
    Profile::new(F0, "STM32F09xxx", 0x442, Some(0x50), &[Region::new(0x2000_1800, 0x2000_8000)], &[Region::new(0x1FFF_D800, 0x1FFF_F800)], Flash::new(0x0800_0000, 0x0804_0000, Uniform(2 * KB)), F0_OPTION, Some(0x1FFF_F796), DeviceFlags::OBL_LAUNCH),
    Profile::new(F0, "STM32F071xx/072xx", 0x448, Some(0xA1), &[Region::new(0x2000_1800, 0x2000_4000)], &[Region::new(0x1FFF_C800, 0x1FFF_F800)], Flash::new(0x0800_0000, 0x0802_0000, Uniform(2 * KB)), F0_OPTION, Some(0x1FFF_F6A6), NONE),
    Profile::new(F1, "STM32F10xxx Low-density", 0x412, None, &[Region::new(0x2000_0200, 0x2000_2800)], F1_SYSTEM, Flash::new(0x0800_0000, 0x0800_8000, Uniform(KB)), F1_OPTION, None, NONE),
    Profile::new(F1, "STM32F10xxx Medium-density", 0x410, None, &[Region::new(0x2000_0200, 0x2000_5000)], F1_SYSTEM, Flash::new(0x0800_0000, 0x0802_0000, Uniform(KB)), F1_OPTION, None, NONE),
    Profile::new(F1, "STM32F10xxx High-density", 0x414, None, &[Region::new(0x2000_0200, 0x2001_0000)], F1_SYSTEM, Flash::new(0x0800_0000, 0x0808_0000, Uniform(2 * KB)), F1_OPTION, None, NONE),
    Profile::new(F1, "STM32F10xxx Medium-density value line", 0x420, Some(0x10), &[Region::new(0x2000_0200, 0x2000_2000)], F1_SYSTEM, Flash::new(0x0800_0000, 0x0802_0000, Uniform(KB)), F1_OPTION, Some(0x1FFF_F7D6), NONE),
    Profile::new(F1, "STM32F10xxx High-density value line", 0x428, Some(0x10), &[Region::new(0x2000_0200, 0x2000_8000)], F1_SYSTEM, Flash::new(0x0800_0000, 0x0808_0000, Uniform(2 * KB)), F1_OPTION, Some(0x1FFF_F7D6), NONE),
    Profile::new(F1, "STM32F105xx/107xx Connectivity line", 0x418, None, &[Region::new(0x2000_1000, 0x2001_0000)], &[Region::new(0x1FFF_B000, 0x1FFF_F800)], Flash::new(0x0800_0000, 0x0804_0000, Uniform(2 * KB)), F1_OPTION, None, NONE),
    Profile::new(F1, "STM32F10xxx XL-density", 0x430, Some(0x21), &[Region::new(0x2000_0800, 0x2001_8000)], &[Region::new(0x1FFF_E000, 0x1FFF_F800)], Flash::new(0x0800_0000, 0x0810_0000, Uniform(2 * KB)), F1_OPTION, Some(0x1FFF_F7D6), NONE),
    Profile::new(F1, "STM32F103x8/B Medium-density performance", 0x641, None, &[Region::new(0x2000_0200, 0x2000_5000)], F1_SYSTEM, Flash::new(0x0800_0000, 0x0802_0000, Uniform(KB)), F1_OPTION, None, NONE),
    Profile::new(F2, "STM32F2xxxx", 0x411, Some(0x20), &[Region::new(0x2000_2000, 0x2002_0000)], F2_F4_SYSTEM, Flash::new(0x0800_0000, 0x0810_0000, Sectors(F2_F4_SECTORS)), F2_F4_OPTION, None, NONE),
    Profile::new(F2, "STM32F2xxxx", 0x411, Some(0x33), &[Region::new(0x2000_2000, 0x2002_0000)], F2_F4_SYSTEM, Flash::new(0x0800_0000, 0x0810_0000, Sectors(F2_F4_SECTORS)), F2_F4_OPTION, None, NONE),
    Profile::new(F3, "STM32F373xx", 0x432, Some(0x41), &[Region::new(0x2000_1400, 0x2000_8000)], F3_SYSTEM, Flash::new(0x0800_0000, 0x0804_0000, Uniform(2 * KB)), F1_OPTION, Some(0x1FFF_F7A6), NONE),
    Profile::new(F3, "STM32F378xx", 0x432, Some(0x50), &[Region::new(0x2000_1000, 0x2000_8000)], F3_SYSTEM, Flash::new(0x0800_0000, 0x0804_0000, Uniform(2 * KB)), F1_OPTION, Some(0x1FFF_F7A6), NONE),
    Profile::new(F3, "STM32F302xB(C)/303xB(C)", 0x422, Some(0x41), &[Region::new(0x2000_1400, 0x2000_A000)], F3_SYSTEM, Flash::new(0x0800_0000, 0x0804_0000, Uniform(2 * KB)), F1_OPTION, None, NONE),
    Profile::new(F3, "STM32F301xx/302x4(6/8)", 0x439, Some(0x40), &[Region::new(0x2000_1800, 0x2000_4000)], F3_SYSTEM, Flash::new(0x0800_0000, 0x0801_0000, Uniform(2 * KB)), F1_OPTION, None, NONE),
    Profile::new(F3, "STM32F303x4(6/8)/334xx/328xx", 0x438, Some(0x50), &[Region::new(0x2000_1800, 0x2000_3000)], F3_SYSTEM, Flash::new(0x0800_0000, 0x0801_0000, Uniform(2 * KB)), F1_OPTION, None, NONE),
    Profile::new(F3, "STM32F302xD(E)/303xD(E)", 0x446, Some(0x40), &[Region::new(0x2000_1800, 0x2001_0000)], F3_SYSTEM, Flash::new(0x0800_0000, 0x0808_0000, Uniform(2 * KB)), F1_OPTION, None, NONE),
    Profile::new(F4, "STM32F40xxx/41xxx", 0x413, Some(0x31), &[Region::new(0x2000_2000, 0x2002_0000)], F2_F4_SYSTEM, Flash::new(0x0800_0000, 0x0810_0000, Sectors(F2_F4_SECTORS)), F2_F4_OPTION, Some(0x1FFF_77DE), NONE),
    Profile::new(F4, "STM32F40xxx/41xxx", 0x413, Some(0x91), &[Region::new(0x2000_3000, 0x2002_0000)], F2_F4_SYSTEM, Flash::new(0x0800_0000, 0x0810_0000, Sectors(F2_F4_SECTORS)), F2_F4_OPTION, Some(0x1FFF_77DE), NONE),
    Profile::new(F4, "STM32F42xxx/43xxx", 0x419, Some(0x70), &[Region::new(0x2000_3000, 0x2003_0000)], F2_F4_SYSTEM, Flash::new(0x0800_0000, 0x0820_0000, Sectors(F4_DUAL_BANK_SECTORS)), F4_DUAL_OPTION, None, NONE),
    Profile::new(F4, "STM32F42xxx/43xxx", 0x419, Some(0x91), &[Region::new(0x2000_3000, 0x2003_0000)], F2_F4_SYSTEM, Flash::new(0x0800_0000, 0x0820_0000, Sectors(F4_DUAL_BANK_SECTORS)), F4_DUAL_OPTION, None, NONE),
    Profile::new(F4, "STM32F401xB(C)", 0x423, Some(0xD1), &[Region::new(0x2000_3000, 0x2001_0000)], F2_F4_SYSTEM, Flash::new(0x0800_0000, 0x0804_0000, Sectors(F2_F4_SECTORS)), F2_F4_OPTION, None, NONE),
    Profile::new(F4, "STM32F401xD(E)", 0x433, Some(0xD1), &[Region::new(0x2000_3000, 0x2001_8000)], F2_F4_SYSTEM, Flash::new(0x0800_0000, 0x0808_0000, Sectors(F2_F4_SECTORS)), F2_F4_OPTION, None, NONE),
    Profile::new(F4, "STM32F411xx", 0x431, Some(0xD0), &[Region::new(0x2000_3000, 0x2002_0000)], F2_F4_SYSTEM, Flash::new(0x0800_0000, 0x0808_0000, Sectors(F2_F4_SECTORS)), F2_F4_OPTION, None, NONE),
    Profile::new(F4, "STM32F412xx", 0x441, Some(0x90), &[Region::new(0x2000_3000, 0x2004_0000)], F2_F4_SYSTEM, Flash::new(0x0800_0000, 0x0810_0000, Sectors(F2_F4_SECTORS)), F2_F4_OPTION, None, NONE),
    Profile::new(F4, "STM32F446xx", 0x421, Some(0x90), &[Region::new(0x2000_3000, 0x2002_0000)], F2_F4_SYSTEM, Flash::new(0x0800_0000, 0x0808_0000, Sectors(F2_F4_SECTORS)), F2_F4_OPTION, None, NONE),
    Profile::new(F7, "STM32F72xxx/73xxx", 0x452, Some(0x90), &[Region::new(0x2000_4000, 0x2004_0000)], F7_SYSTEM, Flash::new(0x0800_0000, 0x0808_0000, Sectors(F2_F4_SECTORS)), F7_OPTION, None, NONE),
    Profile::new(F7, "STM32F74xxx/75xxx", 0x449, Some(0x70), &[Region::new(0x2000_4000, 0x2005_0000)], F7_SYSTEM, Flash::new(0x0800_0000, 0x0810_0000, Sectors(F7_SECTORS)), F7_OPTION, None, NONE),
    Profile::new(F7, "STM32F74xxx/75xxx", 0x449, Some(0x90), &[Region::new(0x2000_4000, 0x2005_0000)], F7_SYSTEM, Flash::new(0x0800_0000, 0x0810_0000, Sectors(F7_SECTORS)), F7_OPTION, None, NONE),
    Profile::new(F7, "STM32F76xxx/77xxx", 0x451, Some(0x93), &[Region::new(0x2000_4000, 0x2008_0000)], F7_SYSTEM, Flash::new(0x0800_0000, 0x0820_0000, Sectors(F7_SECTORS)), F7_OPTION, None, NONE),
    Profile::new(G0, "STM32G03xxx/04xxx", 0x466, Some(0x53), &[Region::new(0x2000_1000, 0x2000_2000)], &[Region::new(0x1FFF_0000, 0x1FFF_2000)], Flash::new(0x0800_0000, 0x0801_0000, Uniform(2 * KB)), G0_OPTION, Some(0x1FFF_1FFE), NONE),
    Profile::new(G0, "STM32G07xxx/08xxx", 0x460, Some(0xB3), &[Region::new(0x2000_2700, 0x2000_9000)], G_SYSTEM, Flash::new(0x0800_0000, 0x0802_0000, Uniform(2 * KB)), G0_OPTION, Some(0x1FFF_6FFE), NONE),
    Profile::new(G0, "STM32G05xxx/061xx", 0x456, Some(0x51), &[Region::new(0x2000_1000, 0x2000_2000)], &[Region::new(0x1FFF_0000, 0x1FFF_1000)], Flash::new(0x0800_0000, 0x0801_0000, Uniform(2 * KB)), G0_OPTION, Some(0x1FFF_1FFE), NONE),
    Profile::new(G4, "STM32G431xx/441xx", 0x468, Some(0xD4), &[Region::new(0x2000_4000, 0x2000_5800)], G_SYSTEM, Flash::new(0x0800_0000, 0x0802_0000, Uniform(2 * KB)), G4_OPTION, None, NONE),
    Profile::new(G4, "STM32G47xxx/48xxx", 0x469, Some(0xD5), &[Region::new(0x2000_4000, 0x2001_8000)], G_SYSTEM, Flash::new(0x0800_0000, 0x0808_0000, Uniform(2 * KB)), G4_OPTION, None, NONE),
    Profile::new(G4, "STM32G491xx/A1xx", 0x479, Some(0xD2), &[Region::new(0x2000_4000, 0x2001_C000)], G_SYSTEM, Flash::new(0x0800_0000, 0x0808_0000, Uniform(2 * KB)), G4_OPTION, None, NONE),
    Profile::new(H7, "STM32H72xxx/73xxx", 0x483, Some(0x93), &[Region::new(0x2000_4100, 0x2002_0000), Region::new(0x2400_4000, 0x2405_0000)], H7_SYSTEM, Flash::new(0x0800_0000, 0x0810_0000, Uniform(128 * KB)), None, Some(0x1FF1_E7FE), NONE),
    Profile::new(H7, "STM32H74xxx/75xxx", 0x450, Some(0x91), &[Region::new(0x2000_4100, 0x2002_0000), Region::new(0x2400_5000, 0x2408_0000)], H7_SYSTEM, Flash::new(0x0800_0000, 0x0820_0000, Uniform(128 * KB)), None, Some(0x1FF1_E7FE), NONE),
    Profile::new(H7, "STM32H7A3xx/B3xx", 0x480, Some(0x92), &[Region::new(0x2000_4100, 0x2002_0000), Region::new(0x2403_4000, 0x2408_0000)], &[Region::new(0x1FF0_0000, 0x1FF1_4000)], Flash::new(0x0800_0000, 0x0810_0000, Uniform(8 * KB)), None, Some(0x1FF1_3FFE), NONE),
    Profile::new(L0, "STM32L01xxx/02xxx", 0x457, Some(0xC3), &[], L0_SYSTEM, Flash::new(0x0800_0000, 0x0800_4000, Uniform(128)), L0_L1_OPTION, Some(0x1FF0_0FFE), NONE),
    Profile::new(L0, "STM32L031xx/041xx", 0x425, Some(0xC0), &[Region::new(0x2000_1000, 0x2000_2000)], L0_SYSTEM, Flash::new(0x0800_0000, 0x0800_8000, Uniform(128)), L0_L1_OPTION, Some(0x1FF0_0FFE), NONE),
    Profile::new(L0, "STM32L05xxx/06xxx", 0x417, Some(0xC0), &[Region::new(0x2000_1000, 0x2000_2000)], L0_SYSTEM, Flash::new(0x0800_0000, 0x0801_0000, Uniform(128)), L0_L1_OPTION, Some(0x1FF0_0FFE), NONE),
    Profile::new(L0, "STM32L07xxx/08xxx", 0x447, Some(0x41), &[Region::new(0x2000_1000, 0x2000_5000)], &[Region::new(0x1FF0_0000, 0x1FF0_2000)], Flash::new(0x0800_0000, 0x0803_0000, Uniform(128)), L0_L1_OPTION, Some(0x1FF0_1FFE), NONE),
    Profile::new(L0, "STM32L07xxx/08xxx", 0x447, Some(0xB2), &[Region::new(0x2000_1400, 0x2000_5000)], &[Region::new(0x1FF0_0000, 0x1FF0_2000)], Flash::new(0x0800_0000, 0x0803_0000, Uniform(128)), L0_L1_OPTION, Some(0x1FF0_1FFE), NONE),
    Profile::new(L1, "STM32L1xxx6(8/B) Medium-density ULP", 0x416, Some(0x20), &[Region::new(0x2000_0800, 0x2000_4000)], L1_SYSTEM, Flash::new(0x0800_0000, 0x0802_0000, Uniform(256)), L0_L1_OPTION, Some(0x1FF0_0FFE), NONE),
    Profile::new(L1, "STM32L1xxx6(8/B)A", 0x429, Some(0x20), &[Region::new(0x2000_1000, 0x2000_8000)], L1_SYSTEM, Flash::new(0x0800_0000, 0x0802_0000, Uniform(256)), L0_L1_OPTION, Some(0x1FF0_0FFE), NONE),
    Profile::new(L1, "STM32L1xxxC", 0x427, Some(0x40), &[Region::new(0x2000_1000, 0x2000_8000)], L1_SYSTEM, Flash::new(0x0800_0000, 0x0804_0000, Uniform(256)), L0_L1_OPTION, Some(0x1FF0_1FFE), NONE),
    Profile::new(L1, "STM32L1xxxD", 0x436, Some(0x45), &[Region::new(0x2000_1000, 0x2000_C000)], L1_SYSTEM, Flash::new(0x0800_0000, 0x0806_0000, Uniform(256)), L0_L1_OPTION, Some(0x1FF0_1FFE), NONE),
    Profile::new(L1, "STM32L1xxxE", 0x437, Some(0x40), &[Region::new(0x2000_1000, 0x2001_4000)], L1_SYSTEM, Flash::new(0x0800_0000, 0x0808_0000, Uniform(256)), L0_L1_OPTION, Some(0x1FF0_1FFE), NONE),
    Profile::new(L4, "STM32L412xx/422xx", 0x464, Some(0xD1), &[Region::new(0x2000_2100, 0x2000_8000)], G_SYSTEM, Flash::new(0x0800_0000, 0x0802_0000, Uniform(2 * KB)), L4_OPTION, None, NONE),
    Profile::new(L4, "STM32L43xxx/44xxx", 0x435, Some(0x91), &[Region::new(0x2000_3100, 0x2000_C000)], G_SYSTEM, Flash::new(0x0800_0000, 0x0804_0000, Uniform(2 * KB)), L4_OPTION, None, NONE),
    Profile::new(L4, "STM32L45xxx/46xxx", 0x462, Some(0x92), &[Region::new(0x2000_3100, 0x2002_0000)], G_SYSTEM, Flash::new(0x0800_0000, 0x0808_0000, Uniform(2 * KB)), L4_OPTION, None, DeviceFlags::CLEAR_PEMPTY),
    Profile::new(L4, "STM32L47xxx/48xxx", 0x415, Some(0xA3), &[Region::new(0x2000_3000, 0x2001_8000)], G_SYSTEM, Flash::new(0x0800_0000, 0x0810_0000, Uniform(2 * KB)), L4_OPTION, None, NONE),
    Profile::new(L4, "STM32L47xxx/48xxx", 0x415, Some(0x92), &[Region::new(0x2000_3100, 0x2001_8000)], G_SYSTEM, Flash::new(0x0800_0000, 0x0810_0000, Uniform(2 * KB)), L4_OPTION, None, NONE),
    Profile::new(L4, "STM32L496xx/4A6xx", 0x461, Some(0x93), &[Region::new(0x2000_3100, 0x2004_0000)], G_SYSTEM, Flash::new(0x0800_0000, 0x0810_0000, Uniform(2 * KB)), L4_OPTION, None, NONE),
    Profile::new(L5, "STM32L552xx/562xx", 0x472, Some(0x92), &[Region::new(0x2000_4000, 0x2004_0000)], &[Region::new(0x0BF9_0000, 0x0BF9_8000)], Flash::new(0x0800_0000, 0x0808_0000, Uniform(2 * KB)), None, Some(0x0BF9_7FFE), NONE),
    Profile::new(WB, "STM32WB10xx/15xx", 0x494, Some(0xB1), &[Region::new(0x2000_5000, 0x2004_0000)], G_SYSTEM, Flash::new(0x0800_0000, 0x0805_0000, Uniform(2 * KB)), G0_OPTION, Some(0x1FFF_6FFE), NONE),
    Profile::new(WB, "STM32WB30xx/35xx/50xx/55xx", 0x495, Some(0xD5), &[Region::new(0x2000_4000, 0x2000_C000)], G_SYSTEM, Flash::new(0x0800_0000, 0x0810_0000, Uniform(4 * KB)), Some(Region::new(0x1FFF_8000, 0x1FFF_8080)), Some(0x1FFF_6FFE), NONE),
    Profile::new(WL, "STM32WLE5xx/WL55xx", 0x497, Some(0xC4), &[Region::new(0x2000_2000, 0x2001_0000)], &[Region::new(0x1FFF_0000, 0x1FFF_4000)], Flash::new(0x0800_0000, 0x0804_0000, Uniform(2 * KB)), Some(Region::new(0x1FFF_7800, 0x1FFF_8000)), Some(0x1FFF_3EFE), NONE),
    Profile::new(U5, "STM32U575xx/585xx", 0x482, Some(0x92), &[Region::new(0x2000_4000, 0x200C_0000)], &[Region::new(0x0BF9_0000, 0x0BFA_0000)], Flash::new(0x0800_0000, 0x0820_0000, Uniform(8 * KB)), None, Some(0x0BF9_9EFE), NONE),
    Profile::new(W, "STM32W 128kB", 0x9A8, None, &[Region::new(0x2000_0200, 0x2000_2000)], &[Region::new(0x0804_0000, 0x0804_0800)], Flash::new(0x0800_0000, 0x0802_0000, Uniform(KB)), Some(Region::new(0x0804_0800, 0x0804_0810)), None, NONE),
    Profile::new(W, "STM32W 256kB", 0x9B0, None, &[Region::new(0x2000_0200, 0x2000_4000)], &[Region::new(0x0804_0000, 0x0804_0800)], Flash::new(0x0800_0000, 0x0804_0000, Uniform(2 * KB)), Some(Region::new(0x0804_0800, 0x0804_0810)), None, NONE),
    Profile::new(NRG, "BlueNRG-1", 0x03, None, &[Region::new(0x2000_0000, 0x2000_6000)], NRG_SYSTEM, Flash::new(0x1004_0000, 0x1006_8000, Uniform(2 * KB)), None, None, NONE),
    Profile::new(NRG, "BlueNRG-2", 0x2F, None, &[Region::new(0x2000_0000, 0x2000_6000)], NRG_SYSTEM, Flash::new(0x1004_0000, 0x1008_0000, Uniform(2 * KB)), None, None, NONE),
    Profile::new(NRG, "BlueNRG-LP", 0x3F, None, &[Region::new(0x2000_0000, 0x2001_0000)], NRG_LP_SYSTEM, Flash::new(0x1004_0000, 0x1008_0000, Uniform(2 * KB)), None, None, NONE),
    Profile::new(NRG, "BlueNRG-LPS", 0x3B, None, &[Region::new(0x2000_0000, 0x2000_6000)], NRG_LP_SYSTEM, Flash::new(0x1004_0000, 0x1007_0000, Uniform(2 * KB)), None, None, NONE),
];

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn high_density_f1_geometry() {
        let p = ProfileTable::builtin().profile_for(0x414, None).unwrap();

        assert_eq!(p.flash_base(), 0x0800_0000);
        assert_eq!(p.flash_size(), 512 * KB);
        assert_eq!(p.page_layout(), PageLayout::Uniform(2048));
        assert_eq!(p.max_write_chunk(), 2048);
        assert_eq!(p.max_read_chunk(), 256);
        assert!(!p.extended_erase());
    }

    #[test]
    fn unknown_ids_are_not_errors() {
        let table = ProfileTable::builtin();
        for id in &[0x000u16, 0x001, 0x7FF, 0xFFFF, 0x0ABC] {
            assert_eq!(table.profile_for(*id, None), None);
            assert_eq!(table.profile_for(*id, Some(0x10)), None);
        }
    }

    #[test]
    fn generic_profile_fits_address_space() {
        let p = Profile::generic(0x0ABC, 64 * KB).unwrap();
        assert_eq!(p.flash_base(), 0x0800_0000);
        assert_eq!(p.flash_size(), 64 * KB);
        assert_eq!(p.flash.pages().count(), 64);

        assert!(Profile::generic(0x0ABC, 0xF7FF_FFFF).is_some());
        assert_eq!(Profile::generic(0x0123, 0xF800_0000), None);
        assert_eq!(Profile::generic(0x0123, u32::MAX), None);
    }

    #[test]
    fn bootloader_id_refines_variant() {
        let table = ProfileTable::builtin();
        assert!(table.has_variants(0x413));
        assert_eq!(table.profile_for(0x413, Some(0x91)).unwrap().bootloader_id, Some(0x91));
        assert_eq!(table.profile_for(0x413, None).unwrap().bootloader_id, Some(0x31));
        // Unknown bootloader IDs fall back to the first variant
        assert_eq!(table.profile_for(0x413, Some(0x42)).unwrap().bootloader_id, Some(0x31));
    }

    #[test]
    fn sector_layout_repeats_last_size() {
        let p = ProfileTable::builtin().profile_for(0x413, None).unwrap();
        let pages: Vec<_> = p.flash.pages().collect();

        assert_eq!(pages.len(), 12);
        assert_eq!(pages[0], Page { index: 0, address: 0x0800_0000, size: 16 * KB });
        assert_eq!(pages[4], Page { index: 4, address: 0x0801_0000, size: 64 * KB });
        assert_eq!(pages[11].end(), 0x0810_0000);
        assert_eq!(p.max_write_chunk(), 16 * KB as usize);
    }

    #[test]
    fn memory_map_checks() {
        let p = ProfileTable::builtin().profile_for(0x414, None).unwrap();

        assert!(p.contains(0x0800_0000, 256));
        assert!(p.contains(0x0807_FF00, 256));
        assert!(!p.contains(0x0807_FF01, 256));
        assert!(p.contains(0x2000_0200, 4));
        assert!(p.contains(0x1FFF_F7E8, 12));
        assert!(!p.contains(0x4000_0000, 1));

        assert!(p.is_executable(0x0800_0000));
        assert!(!p.is_executable(0x1FFF_F000));
    }

    #[test]
    fn erase_strategy_selection() {
        let f1 = ProfileTable::builtin().profile_for(0x414, None).unwrap();
        let f4 = ProfileTable::builtin().profile_for(0x413, None).unwrap();

        assert_eq!(EraseStrategy::resolve(f4, true, true), Some(EraseStrategy::Extended));
        assert_eq!(EraseStrategy::resolve(f1, true, true), Some(EraseStrategy::Legacy));
        assert_eq!(EraseStrategy::resolve(f1, false, true), Some(EraseStrategy::Extended));
        assert_eq!(EraseStrategy::resolve(f4, true, false), Some(EraseStrategy::Legacy));
        assert_eq!(EraseStrategy::resolve(f4, false, false), None);
    }

    #[test]
    fn uid_is_word_swapped() {
        let uid = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB];
        assert_eq!(format_uid(&uid), "1100-3322-77665544-BBAA9988");
    }

    #[test]
    fn long_access_block_is_addressable() {
        let f4 = ProfileTable::builtin().profile_for(0x413, None).unwrap();
        assert_eq!(f4.register_block(), Some(Region::new(0x1FFF_7A00, 0x1FFF_7B00)));
        assert!(f4.contains(0x1FFF_7A00, 256));

        let f1 = ProfileTable::builtin().profile_for(0x414, None).unwrap();
        assert_eq!(f1.register_block(), None);
    }

    #[test]
    fn family_quirks() {
        let l0 = ProfileTable::builtin().profile_for(0x417, None).unwrap();
        assert!(!l0.mass_erase());
        assert_eq!(l0.max_read_chunk(), 128);
        assert_eq!(l0.max_write_chunk(), 128);
        assert!(l0.flags().contains(DeviceFlags::LONG_UID_ACCESS));

        let nrg = ProfileTable::builtin().profile_for(0x2F, None).unwrap();
        assert!(nrg.flags().contains(DeviceFlags::FORCE_PARITY_NONE));
    }
}
