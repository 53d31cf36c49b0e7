//! Memory operation planner
//!
//! Splits reads, writes and erases into bounded chunks before any bytes go
//! on the wire. Plans are plain data: planning the same input twice yields
//! the same plan.

use std::convert::TryFrom;

use crate::device::{EraseStrategy, Page, Profile, Region};

/// Planner failures, converted into [`crate::Error`] by the programmer
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum PlanError {
    #[error("address range {address:#010x}+{length:#x} is outside flash")]
    OutOfRange { address: u32, length: usize },

    #[error("empty address range")]
    EmptyRange,

    #[error("page {0} cannot be encoded by the selected erase command")]
    PageNotEncodable(u32),
}

/// One bounded operation: `length` bytes at `address`, with the bytes to
/// write for write plans
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk<'a> {
    pub address: u32,
    pub length: usize,
    pub data: Option<&'a [u8]>,
}

impl<'a> Chunk<'a> {
    pub fn end(&self) -> u64 {
        self.address as u64 + self.length as u64
    }
}

fn check_span(address: u32, length: usize) -> Result<(), PlanError> {
    if address as u64 + length as u64 > 1 << 32 {
        return Err(PlanError::OutOfRange { address, length });
    }
    Ok(())
}

/// Split `data` into chunks of at most `max_chunk` bytes starting at `base`
pub fn plan_write(base: u32, data: &[u8], max_chunk: usize) -> Result<Vec<Chunk<'_>>, PlanError> {
    check_span(base, data.len())?;

    let max_chunk = max_chunk.max(1);
    let chunks = data
        .chunks(max_chunk)
        .enumerate()
        .map(|(i, d)| Chunk {
            address: base + (i * max_chunk) as u32,
            length: d.len(),
            data: Some(d),
        })
        .collect();

    Ok(chunks)
}

/// Lazy, restartable sequence of read chunks
#[derive(Clone, Debug, PartialEq)]
pub struct ReadPlan {
    next: u64,
    end: u64,
    max_chunk: usize,
}

impl ReadPlan {
    pub fn new(address: u32, length: usize, max_chunk: usize) -> Result<Self, PlanError> {
        check_span(address, length)?;

        Ok(Self {
            next: address as u64,
            end: address as u64 + length as u64,
            max_chunk: max_chunk.max(1),
        })
    }

    /// Address of the next chunk to be produced, saturating at `u32::MAX`
    /// once a plan ending at the top of the address space is used up
    pub fn position(&self) -> u32 {
        u32::try_from(self.next).unwrap_or(u32::MAX)
    }

    pub fn remaining(&self) -> usize {
        (self.end - self.next) as usize
    }

    /// Continue the plan from `address`, e.g. after a failed chunk
    pub fn resume_from(&self, address: u32) -> Self {
        let next = (address as u64).min(self.end);
        Self { next, ..self.clone() }
    }
}

impl Iterator for ReadPlan {
    type Item = Chunk<'static>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }

        let length = (self.end - self.next).min(self.max_chunk as u64) as usize;
        let chunk = Chunk { address: self.next as u32, length, data: None };
        self.next += length as u64;

        Some(chunk)
    }
}

/// Plan `length` bytes from `address` in chunks of at most `max_chunk`
pub fn plan_read(address: u32, length: usize, max_chunk: usize) -> Result<ReadPlan, PlanError> {
    ReadPlan::new(address, length, max_chunk)
}

/// How an erase plan is carried out
#[derive(Clone, Debug, PartialEq)]
pub enum EraseOp {
    /// Global erase of the whole flash
    Mass,
    /// Page erase, in address order
    Pages(Vec<Page>),
}

/// Page aligned erase covering a requested range
#[derive(Clone, Debug, PartialEq)]
pub struct ErasePlan {
    pub strategy: EraseStrategy,
    /// Requested range rounded outward to whole pages
    pub region: Region,
    pub op: EraseOp,
}

impl ErasePlan {
    /// Page groups, each small enough for a single erase command
    pub fn batches(&self) -> Vec<&[Page]> {
        match &self.op {
            EraseOp::Mass => Vec::new(),
            EraseOp::Pages(pages) => pages.chunks(self.strategy.max_pages()).collect(),
        }
    }

    /// Erased pages as address chunks
    pub fn chunks(&self) -> Vec<Chunk<'static>> {
        match &self.op {
            EraseOp::Mass => vec![Chunk {
                address: self.region.start,
                length: self.region.size() as usize,
                data: None,
            }],
            EraseOp::Pages(pages) => pages
                .iter()
                .map(|p| Chunk { address: p.address, length: p.size as usize, data: None })
                .collect(),
        }
    }
}

/// Round `[address, address + length)` outward to whole flash pages
///
/// Mass erase is used only when the rounded range is the whole flash and
/// the family accepts it.
pub fn plan_erase(
    profile: &Profile,
    strategy: EraseStrategy,
    address: u32,
    length: usize,
) -> Result<ErasePlan, PlanError> {
    if length == 0 {
        return Err(PlanError::EmptyRange);
    }
    if !profile.flash.region.contains(address, length) {
        return Err(PlanError::OutOfRange { address, length });
    }

    let end = address as u64 + length as u64;
    let pages: Vec<Page> = profile
        .flash
        .pages()
        .filter(|p| (p.end() as u64) > address as u64 && (p.address as u64) < end)
        .collect();

    let (first, last) = match (pages.first(), pages.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return Err(PlanError::OutOfRange { address, length }),
    };
    let region = Region::new(first.address, last.end());

    if region == profile.flash.region && profile.mass_erase() {
        return Ok(ErasePlan { strategy, region, op: EraseOp::Mass });
    }

    if let Some(p) = pages.iter().find(|p| p.index > strategy.max_page_index()) {
        return Err(PlanError::PageNotEncodable(p.index));
    }

    Ok(ErasePlan { strategy, region, op: EraseOp::Pages(pages) })
}

/// Erase the whole flash, page by page where mass erase is unavailable
pub fn plan_erase_all(profile: &Profile, strategy: EraseStrategy) -> Result<ErasePlan, PlanError> {
    plan_erase(profile, strategy, profile.flash_base(), profile.flash_size() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ProfileTable;
    use pretty_assertions::assert_eq;

    fn f1_hd() -> &'static Profile {
        ProfileTable::builtin().profile_for(0x414, None).unwrap()
    }

    #[test]
    fn write_plan_for_high_density_f1() {
        let p = f1_hd();
        let data = vec![0xA5u8; 5000];

        let plan = plan_write(p.flash_base(), &data, p.max_write_chunk()).unwrap();

        let spans: Vec<_> = plan.iter().map(|c| (c.address, c.length)).collect();
        assert_eq!(spans, vec![(0x0800_0000, 2048), (0x0800_0800, 2048), (0x0800_1000, 904)]);
    }

    #[test]
    fn write_plan_covers_input_once_in_order() {
        let data: Vec<u8> = (0..3000u32).map(|v| v as u8).collect();

        let plan = plan_write(0x2000_0000, &data, 256).unwrap();
        assert!(plan.iter().all(|c| c.length <= 256));
        assert!(plan.windows(2).all(|w| w[0].end() == w[1].address as u64));

        let joined: Vec<u8> = plan.iter().flat_map(|c| c.data.unwrap().iter().copied()).collect();
        assert_eq!(joined, data);

        assert_eq!(plan_write(0x2000_0000, &data, 256).unwrap(), plan);
    }

    #[test]
    fn write_plan_rejects_address_wrap() {
        let data = [0u8; 16];
        assert_eq!(
            plan_write(0xFFFF_FFF8, &data, 256),
            Err(PlanError::OutOfRange { address: 0xFFFF_FFF8, length: 16 })
        );
    }

    #[test]
    fn erase_within_one_page() {
        let p = f1_hd();
        let plan = plan_erase(p, EraseStrategy::Legacy, 0x0800_0810, 16).unwrap();

        assert_eq!(plan.region, Region::new(0x0800_0800, 0x0800_1000));
        assert_eq!(plan.op, EraseOp::Pages(vec![Page { index: 1, address: 0x0800_0800, size: 2048 }]));
    }

    #[test]
    fn erase_rounds_outward_across_pages() {
        let p = f1_hd();
        let plan = plan_erase(p, EraseStrategy::Legacy, 0x0800_07FF, 2).unwrap();

        let chunks: Vec<_> = plan.chunks().iter().map(|c| (c.address, c.length)).collect();
        assert_eq!(chunks, vec![(0x0800_0000, 2048), (0x0800_0800, 2048)]);
    }

    #[test]
    fn full_range_uses_mass_erase() {
        let p = f1_hd();
        let plan = plan_erase_all(p, EraseStrategy::Legacy).unwrap();
        assert_eq!(plan.op, EraseOp::Mass);
        assert!(plan.batches().is_empty());
    }

    #[test]
    fn families_without_mass_erase_erase_pages() {
        let l0 = ProfileTable::builtin().profile_for(0x417, None).unwrap();
        let plan = plan_erase_all(l0, EraseStrategy::Extended).unwrap();

        match &plan.op {
            EraseOp::Pages(pages) => assert_eq!(pages.len(), 512),
            op => panic!("unexpected erase op {:?}", op),
        }
        assert_eq!(plan.batches().len(), 1);
    }

    #[test]
    fn legacy_erase_limits() {
        let p = Profile::generic(0x0ABC, 1024 * 1024).unwrap();

        // 256 pages fit in page numbers 0..=255 but need two commands
        let plan = plan_erase(&p, EraseStrategy::Legacy, 0x0800_0000, 256 * 1024).unwrap();
        let sizes: Vec<_> = plan.batches().iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![255, 1]);
        assert_eq!(plan.batches()[1][0].index, 255);

        // XL-density parts have 512 pages, beyond one byte page numbers
        let xl = ProfileTable::builtin().profile_for(0x430, None).unwrap();
        let page_300 = 0x0800_0000 + 300 * 2048;
        assert_eq!(
            plan_erase(xl, EraseStrategy::Legacy, page_300, 16),
            Err(PlanError::PageNotEncodable(300))
        );
        assert!(plan_erase(xl, EraseStrategy::Extended, page_300, 16).is_ok());
    }

    #[test]
    fn erase_outside_flash_fails() {
        let p = f1_hd();
        assert_eq!(
            plan_erase(p, EraseStrategy::Legacy, 0x0808_0000, 1),
            Err(PlanError::OutOfRange { address: 0x0808_0000, length: 1 })
        );
        assert_eq!(plan_erase(p, EraseStrategy::Legacy, 0x0800_0000, 0), Err(PlanError::EmptyRange));
    }

    #[test]
    fn read_plan_is_restartable() {
        let plan = plan_read(0x0800_0000, 600, 256).unwrap();

        let spans: Vec<_> = plan.clone().map(|c| (c.address, c.length)).collect();
        assert_eq!(spans, vec![(0x0800_0000, 256), (0x0800_0100, 256), (0x0800_0200, 88)]);

        let resumed: Vec<_> = plan.resume_from(0x0800_0100).map(|c| c.address).collect();
        assert_eq!(resumed, vec![0x0800_0100, 0x0800_0200]);

        let mut partial = plan.clone();
        partial.next();
        assert_eq!(partial.position(), 0x0800_0100);
        assert_eq!(partial.remaining(), 344);
    }

    #[test]
    fn read_plan_position_at_top_of_address_space() {
        let mut plan = plan_read(0xFFFF_FF00, 256, 256).unwrap();
        assert_eq!(plan.position(), 0xFFFF_FF00);

        assert!(plan.next().is_some());
        assert!(plan.next().is_none());
        assert_eq!(plan.position(), u32::MAX);
        assert_eq!(plan.remaining(), 0);
    }
}
