//! Planned memory operations
//!
//! Multi-chunk reads, writes and erases built on the single commands of
//! [`Programmer`]. Cancellation and progress are handled between chunks.

use embedded_hal::blocking::delay::DelayMs;

use crate::device::{DeviceFlags, EraseStrategy, Profile};
use crate::engine::Programmer;
use crate::error::Error;
use crate::plan::{plan_erase, plan_erase_all, plan_read, plan_write, EraseOp, ErasePlan, ReadPlan};
use crate::progress::{CancelToken, ProgressSink};
use crate::protocol::MassErase;
use crate::transport::Transport;

/// Firmware image segment
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Segment<'a> {
    pub address: u32,
    pub data: &'a [u8],
}

impl<'a> Segment<'a> {
    pub fn new(address: u32, data: &'a [u8]) -> Self {
        Self { address, data }
    }
}

fn cancelled(cancel: Option<&CancelToken>) -> bool {
    cancel.map(|c| c.is_cancelled()).unwrap_or(false)
}

/// Lazy chunked read, see [`Programmer::read`]
///
/// Stops after the first failed chunk; [`Reader::plan`] then points at that
/// chunk so the read can be resumed with [`Programmer::read_plan`].
pub struct Reader<'p, T: Transport, D> {
    programmer: &'p mut Programmer<T, D>,
    plan: ReadPlan,
    failed: bool,
}

impl<'p, T, D> Reader<'p, T, D>
where
    T: Transport,
    D: DelayMs<u32>,
{
    /// Remaining part of the read
    pub fn plan(&self) -> &ReadPlan {
        &self.plan
    }
}

impl<'p, T, D> Iterator for Reader<'p, T, D>
where
    T: Transport,
    D: DelayMs<u32>,
{
    type Item = Result<(u32, Vec<u8>), Error<T::Error>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let mut plan = self.plan.clone();
        let chunk = plan.next()?;

        match self.programmer.read_memory(chunk.address, chunk.length) {
            Ok(data) => {
                self.plan = plan;
                Some(Ok((chunk.address, data)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl<T, D> Programmer<T, D>
where
    T: Transport,
    D: DelayMs<u32>,
{
    /// Write `data` at `address`, see [`Programmer::write_segments`]
    pub fn write(
        &mut self,
        address: u32,
        data: &[u8],
        progress: &mut dyn ProgressSink,
        cancel: Option<&CancelToken>,
    ) -> Result<(), Error<T::Error>> {
        self.write_segments(&[Segment::new(address, data)], progress, cancel)
    }

    /// Write image segments chunk by chunk
    ///
    /// Every segment is range checked before anything is sent. A chunk that
    /// still fails after its retries ends the write with
    /// [`Error::PartialWriteFailure`]; chunks already written stay written.
    pub fn write_segments(
        &mut self,
        segments: &[Segment],
        progress: &mut dyn ProgressSink,
        cancel: Option<&CancelToken>,
    ) -> Result<(), Error<T::Error>> {
        let profile = self.active_profile()?;

        for s in segments {
            if !profile.contains(s.address, s.data.len()) {
                return Err(Error::AddressOutOfRange { address: s.address, length: s.data.len() });
            }
        }

        let total = segments.iter().map(|s| s.data.len()).sum();
        let transfer = profile.max_transfer();
        let mut written = 0;
        let mut last_good = None;

        for s in segments {
            debug!("Writing {} bytes at {:#010x}", s.data.len(), s.address);

            for chunk in plan_write(s.address, s.data, profile.max_write_chunk())? {
                if cancelled(cancel) {
                    info!("Write cancelled at {:#010x}", chunk.address);
                    return Err(Error::Cancelled { address: chunk.address });
                }

                let data = chunk.data.unwrap_or_default();
                for (i, block) in data.chunks(transfer).enumerate() {
                    let address = chunk.address + (i * transfer) as u32;

                    if let Err(e) = self.write_memory(address, block) {
                        error!("Write failed at {:#010x} after {} bytes: {}", address, written, e);
                        return Err(Error::PartialWriteFailure {
                            last_good,
                            resume_at: address,
                            written,
                            cause: Box::new(e),
                        });
                    }

                    last_good = Some(address);
                    written += block.len();
                }

                progress.update(written, total);
            }
        }

        Ok(())
    }

    /// Erase whole pages covering `[address, address + length)`
    pub fn erase(&mut self, address: u32, length: usize) -> Result<ErasePlan, Error<T::Error>> {
        let profile = self.active_profile()?;
        let plan = plan_erase(&profile, self.erase_strategy()?, address, length)?;

        self.run_erase(&plan)?;

        Ok(plan)
    }

    /// Erase the whole flash
    pub fn erase_all(&mut self) -> Result<ErasePlan, Error<T::Error>> {
        let profile = self.active_profile()?;
        let plan = plan_erase_all(&profile, self.erase_strategy()?)?;

        self.run_erase(&plan)?;

        Ok(plan)
    }

    fn run_erase(&mut self, plan: &ErasePlan) -> Result<(), Error<T::Error>> {
        info!(
            "Erasing {:#010x}..{:#010x} ({:?})",
            plan.region.start, plan.region.end, plan.strategy
        );

        if plan.op == EraseOp::Mass {
            return self.mass_erase(MassErase::All);
        }

        for batch in plan.batches() {
            match plan.strategy {
                EraseStrategy::Legacy => {
                    let pages: Vec<u8> = batch.iter().map(|p| p.index as u8).collect();
                    self.erase_pages(&pages)?;
                }
                EraseStrategy::Extended => {
                    let pages: Vec<u16> = batch.iter().map(|p| p.index as u16).collect();
                    self.extended_erase(&pages)?;
                }
            }
        }

        Ok(())
    }

    /// Lazy read of `[address, address + length)` in transfer-size chunks
    ///
    /// The whole range is checked up front; dropping the reader early has no
    /// side effects.
    pub fn read(&mut self, address: u32, length: usize) -> Result<Reader<'_, T, D>, Error<T::Error>> {
        let max = match self.profile() {
            Some(p) if !p.contains(address, length) => {
                return Err(Error::AddressOutOfRange { address, length })
            }
            Some(p) => p.max_read_chunk(),
            None => crate::protocol::MAX_CHUNK,
        };

        let plan = plan_read(address, length, max)?;
        Ok(self.read_plan(plan))
    }

    /// Read following an existing plan, e.g. one resumed after a failure
    pub fn read_plan(&mut self, plan: ReadPlan) -> Reader<'_, T, D> {
        Reader { programmer: self, plan, failed: false }
    }

    /// Read `[address, address + length)` into memory
    pub fn read_to_vec(
        &mut self,
        address: u32,
        length: usize,
        progress: &mut dyn ProgressSink,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<u8>, Error<T::Error>> {
        let mut out = Vec::with_capacity(length);
        let mut reader = self.read(address, length)?;

        while reader.plan().remaining() > 0 {
            if cancelled(cancel) {
                return Err(Error::Cancelled { address: reader.plan().position() });
            }

            match reader.next() {
                Some(r) => out.extend_from_slice(&r?.1),
                None => break,
            }

            progress.update(out.len(), length);
        }

        Ok(out)
    }

    /// Compare memory at `address` against `expected`
    pub fn verify(
        &mut self,
        address: u32,
        expected: &[u8],
        progress: &mut dyn ProgressSink,
        cancel: Option<&CancelToken>,
    ) -> Result<(), Error<T::Error>> {
        let total = expected.len();
        let mut done = 0;
        let mut reader = self.read(address, total)?;

        while reader.plan().remaining() > 0 {
            if cancelled(cancel) {
                return Err(Error::Cancelled { address: reader.plan().position() });
            }

            let (chunk_address, data) = match reader.next() {
                Some(r) => r?,
                None => break,
            };

            let reference = &expected[done..done + data.len()];
            if let Some(i) = data.iter().zip(reference).position(|(a, b)| a != b) {
                let address = chunk_address + i as u32;
                error!("Verification failed at {:#010x}", address);
                return Err(Error::VerifyMismatch { address, expected: reference[i], found: data[i] });
            }

            done += data.len();
            progress.update(done, total);
        }

        Ok(())
    }

    /// Read an identification register, honouring the long access quirk
    fn read_register(&mut self, profile: &Profile, address: u32, length: usize) -> Result<Vec<u8>, Error<T::Error>> {
        if !profile.flags().contains(DeviceFlags::LONG_UID_ACCESS) {
            return self.read_memory(address, length);
        }

        let base = address & 0xFFFF_FF00;
        let block = self.read_memory(base, profile.max_read_chunk())?;
        let offset = (address - base) as usize;

        block
            .get(offset..offset + length)
            .map(<[u8]>::to_vec)
            .ok_or(Error::InvalidArgument("register outside the long access block"))
    }

    /// Read the 96-bit unique device ID
    pub fn read_uid(&mut self) -> Result<[u8; 12], Error<T::Error>> {
        let profile = self.active_profile()?;
        let address = profile.uid_address().ok_or(Error::InvalidArgument("device has no unique ID"))?;

        let data = self.read_register(&profile, address, 12)?;

        let mut uid = [0u8; 12];
        uid.copy_from_slice(&data);
        Ok(uid)
    }

    /// Read the flash size register, in KiB
    pub fn read_flash_size(&mut self) -> Result<u16, Error<T::Error>> {
        let profile = self.active_profile()?;
        let address = profile
            .flash_size_address()
            .ok_or(Error::InvalidArgument("device has no flash size register"))?;

        let data = self.read_register(&profile, address, 2)?;

        Ok(u16::from_le_bytes([data[0], data[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{connected, options, script_connect, F1_COMMANDS};
    use crate::mock::{MockTransport, NoDelay, ACK, NACK};
    use crate::progress::NoProgress;
    use crate::protocol::Command;
    use pretty_assertions::assert_eq;
    use std::thread;

    #[test]
    fn write_splits_into_chunks_and_frames() {
        let mut p = connected(3);
        let data = vec![0x5A; 5000];

        // 2048 + 2048 + 904 bytes, sent as 256 byte frames
        for _ in 0..20 {
            p.transport_mut().reply(&[ACK, ACK, ACK]);
        }

        let mut seen = Vec::new();
        p.write(0x0800_0000, &data, &mut |done: usize, total: usize| seen.push((done, total)), None).unwrap();

        assert_eq!(seen, vec![(2048, 5000), (4096, 5000), (5000, 5000)]);
        assert_eq!(p.transport().count_writes(&[0x31, 0xCE]), 20);
        assert_eq!(p.transport().pending(), 0);

        // Final frame carries the 136 byte tail
        let last = p.transport().writes.last().unwrap();
        assert_eq!(last[0], 135);
        assert_eq!(last.len(), 138);
    }

    #[test]
    fn data_nack_reports_partial_write() {
        let mut p = connected(1);
        let data = vec![0x00; 512];

        p.transport_mut().reply(&[ACK, ACK, ACK]).reply(&[ACK, ACK, NACK]);

        let err = p.write(0x0800_0000, &data, &mut NoProgress, None).unwrap_err();
        assert_eq!(
            err,
            Error::PartialWriteFailure {
                last_good: Some(0x0800_0000),
                resume_at: 0x0800_0100,
                written: 256,
                cause: Box::new(Error::CommandRejected { command: Command::WriteMemory, attempts: 1 }),
            }
        );
    }

    #[test]
    fn write_checks_all_segments_first() {
        let mut p = connected(3);
        let a = [0u8; 16];
        let b = [0u8; 16];

        let segments = [Segment::new(0x0800_0000, &a), Segment::new(0x0808_0000, &b)];
        assert_eq!(
            p.write_segments(&segments, &mut NoProgress, None),
            Err(Error::AddressOutOfRange { address: 0x0808_0000, length: 16 })
        );
        assert!(p.transport().written.is_empty());
    }

    #[test]
    fn write_requires_profile() {
        let mut t = MockTransport::new();
        script_connect(&mut t, 0x0ABC, F1_COMMANDS);
        let mut p = Programmer::new(t, NoDelay, options(3));
        p.connect().unwrap();

        assert_eq!(p.write(0x0800_0000, &[0; 4], &mut NoProgress, None), Err(Error::UnknownDeviceProfile(0x0ABC)));

        p.set_profile(Profile::generic(0x0ABC, 64 * 1024).unwrap());
        p.transport_mut().reply(&[ACK, ACK, ACK]);
        assert_eq!(p.write(0x0800_0000, &[0; 4], &mut NoProgress, None), Ok(()));
    }

    #[test]
    fn cancelled_write_stops_between_chunks() {
        let mut p = connected(3);
        let data = vec![0u8; 4096];
        let token = CancelToken::new();

        for _ in 0..8 {
            p.transport_mut().reply(&[ACK, ACK, ACK]);
        }

        let remote = token.clone();
        let mut progress = move |done: usize, _total: usize| {
            if done == 2048 {
                // Cancel from another thread once the first chunk is done
                let r = remote.clone();
                thread::spawn(move || r.cancel()).join().unwrap();
            }
        };

        assert_eq!(
            p.write(0x0800_0000, &data, &mut progress, Some(&token)),
            Err(Error::Cancelled { address: 0x0800_0800 })
        );
        assert_eq!(p.transport().count_writes(&[0x31, 0xCE]), 8);
    }

    #[test]
    fn erase_within_page_sends_one_page() {
        let mut p = connected(3);
        p.transport_mut().reply(&[ACK, ACK]);

        let plan = p.erase(0x0800_0810, 16).unwrap();
        assert_eq!(plan.region.start, 0x0800_0800);
        assert_eq!(p.transport().writes, vec![vec![0x43, 0xBC], vec![0x00, 0x01, 0x01]]);
    }

    #[test]
    fn legacy_erase_splits_into_batches() {
        let mut p = connected(3);
        p.set_profile(Profile::generic(0x0ABC, 1024 * 1024).unwrap());
        p.transport_mut().reply(&[ACK; 4]);

        let plan = p.erase(0x0800_0000, 256 * 1024).unwrap();
        assert_eq!(plan.batches().len(), 2);

        let writes = &p.transport().writes;
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[0], vec![0x43, 0xBC]);
        assert_eq!(writes[1].len(), 257);
        assert_eq!(&writes[1][..3], &[0xFE, 0x00, 0x01]);
        assert_eq!(writes[1][256], 0x01);
        assert_eq!(writes[2], vec![0x43, 0xBC]);
        assert_eq!(writes[3], vec![0x00, 0xFF, 0xFF]);
        assert_eq!(p.transport().pending(), 0);
    }

    #[test]
    fn erase_all_uses_mass_erase() {
        let mut p = connected(3);
        p.transport_mut().reply(&[ACK, ACK]);

        let plan = p.erase_all().unwrap();
        assert_eq!(plan.op, EraseOp::Mass);
        assert_eq!(p.transport().writes, vec![vec![0x43, 0xBC], vec![0xFF, 0x00]]);
    }

    #[test]
    fn read_is_lazy_and_resumable() {
        let mut p = connected(1);
        p.transport_mut().reply(&[ACK, ACK, ACK]).reply(&[0x11; 256]);
        p.transport_mut().reply(&[NACK]);

        let mut reader = p.read(0x0800_0000, 300).unwrap();
        assert_eq!(reader.next().unwrap().unwrap().0, 0x0800_0000);
        assert_eq!(
            reader.next(),
            Some(Err(Error::CommandRejected { command: Command::ReadMemory, attempts: 1 }))
        );
        assert!(reader.next().is_none());
        let plan = reader.plan().clone();
        assert_eq!(plan.position(), 0x0800_0100);

        p.transport_mut().reply(&[ACK, ACK, ACK]).reply(&[0x22; 44]);
        let rest: Vec<_> = p.read_plan(plan).collect::<Result<_, _>>().unwrap();
        assert_eq!(rest, vec![(0x0800_0100, vec![0x22; 44])]);
    }

    #[test]
    fn dropping_reader_sends_nothing() {
        let mut p = connected(3);
        {
            let _reader = p.read(0x0800_0000, 4096).unwrap();
        }
        assert!(p.transport().written.is_empty());
    }

    #[test]
    fn verify_reports_first_mismatch() {
        let mut p = connected(3);
        let expected = [1u8, 2, 3, 4, 5, 6, 7, 8];

        p.transport_mut().reply(&[ACK, ACK, ACK]).reply(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(p.verify(0x0800_0000, &expected, &mut NoProgress, None), Ok(()));

        p.transport_mut().reply(&[ACK, ACK, ACK]).reply(&[1, 2, 3, 4, 5, 0, 7, 0]);
        assert_eq!(
            p.verify(0x0800_0000, &expected, &mut NoProgress, None),
            Err(Error::VerifyMismatch { address: 0x0800_0005, expected: 6, found: 0 })
        );
    }

    #[test]
    fn read_to_vec_collects_chunks() {
        let mut p = connected(3);
        p.transport_mut().reply(&[ACK, ACK, ACK]).reply(&[0xAB; 256]);
        p.transport_mut().reply(&[ACK, ACK, ACK]).reply(&[0xCD; 4]);

        let data = p.read_to_vec(0x0800_0000, 260, &mut NoProgress, None).unwrap();
        assert_eq!(data.len(), 260);
        assert_eq!(&data[254..258], &[0xAB, 0xAB, 0xCD, 0xCD]);
    }

    #[test]
    fn uid_and_flash_size() {
        let mut p = connected(3);
        let uid: Vec<u8> = (0..12).collect();

        p.transport_mut().reply(&[ACK, ACK, ACK]).reply(&uid);
        assert_eq!(p.read_uid().unwrap().to_vec(), uid);
        assert_eq!(p.transport().writes[1], vec![0x1F, 0xFF, 0xF7, 0xE8, 0x1F ^ 0xFF ^ 0xF7 ^ 0xE8]);

        p.transport_mut().reply(&[ACK, ACK, ACK]).reply(&[0x00, 0x02]);
        assert_eq!(p.read_flash_size(), Ok(512));
    }

    #[test]
    fn long_uid_access_reads_whole_block() {
        let mut t = MockTransport::new();
        script_connect(&mut t, 0x413, &[0x00, 0x01, 0x02, 0x11, 0x21, 0x31, 0x44]);
        let mut p = Programmer::new(t, NoDelay, options(3));
        p.connect().unwrap();
        p.transport_mut().writes.clear();

        let mut block = vec![0u8; 256];
        block[0x10..0x1C].copy_from_slice(&[9; 12]);
        block[0x22] = 0x00;
        block[0x23] = 0x04;

        p.transport_mut().reply(&[ACK, ACK, ACK]).reply(&block);
        assert_eq!(p.read_uid(), Ok([9; 12]));
        assert_eq!(p.transport().writes[1], vec![0x1F, 0xFF, 0x7A, 0x00, 0x1F ^ 0xFF ^ 0x7A]);

        p.transport_mut().reply(&[ACK, ACK, ACK]).reply(&block);
        assert_eq!(p.read_flash_size(), Ok(1024));
    }
}
