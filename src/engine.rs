//! Command engine
//!
//! Every bootloader command is a sequence of frames, each acknowledged by
//! the target, optionally followed by response data. [`Programmer::execute`]
//! drives one such sequence with a per-command [`RetryBudget`]: a NACK at
//! any stage restarts the whole sequence from the opcode.

use core::convert::TryFrom;

use embedded_hal::blocking::delay::DelayMs;

use crate::device::{EraseStrategy, Profile, ProfileTable};
use crate::error::Error;
use crate::frame::{checksum, decode_ack, Frame, Reply};
use crate::protocol::{
    speed_code, Command, MassErase, MAX_CHUNK, MAX_EXTENDED_ERASE_PAGES, MAX_LEGACY_ERASE_PAGES,
};
use crate::session::{Session, State};
use crate::transport::{Transport, TransportError};
use crate::Options;

/// Data expected once all frames of a command have been acknowledged
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Response {
    /// Nothing beyond the per-frame acknowledgements
    None,
    /// A further acknowledgement once the command has completed
    Ack,
    /// `n` bytes followed by an acknowledgement
    Fixed(usize),
    /// Count byte N, then N + 1 bytes, then an acknowledgement
    Counted,
    /// `n` bytes with no trailing acknowledgement
    Raw(usize),
}

/// Attempts allowed for a single command invocation
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RetryBudget {
    attempts: u32,
    max: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self { attempts: 0, max: max.max(1) }
    }

    /// Consume an attempt, `false` once the budget is spent
    pub fn try_attempt(&mut self) -> bool {
        if self.attempts >= self.max {
            return false;
        }
        self.attempts += 1;
        true
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max
    }
}

/// Outcome of a failed attempt
#[derive(Debug)]
enum Failure<E: core::fmt::Debug> {
    /// Retryable rejection
    Nack,
    /// No acknowledgement for the opcode, retryable
    Timeout,
    Fatal(Error<E>),
}

impl<E: core::fmt::Debug> From<Error<E>> for Failure<E> {
    fn from(e: Error<E>) -> Self {
        Failure::Fatal(e)
    }
}

/// Response to Get
#[derive(Clone, Debug, PartialEq)]
pub struct BootloaderInfo {
    pub version: u8,
    /// Opcodes accepted by the bootloader
    pub commands: Vec<u8>,
}

impl BootloaderInfo {
    pub fn supports(&self, command: Command) -> bool {
        self.commands.contains(&command.opcode())
    }
}

/// Response to Get Version
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Version {
    pub version: u8,
    pub option_bytes: [u8; 2],
}

/// Identity of the attached device
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Identity {
    pub product_id: u16,
    pub bootloader_version: u8,
    /// Bootloader ID byte, once read
    pub bootloader_id: Option<u8>,
}

/// Render a BCD bootloader version (0x31 is v3.1)
pub fn format_version(version: u8) -> String {
    format!("{}.{}", version >> 4, version & 0x0F)
}

/// STM32 UART bootloader programmer
pub struct Programmer<T: Transport, D> {
    session: Session<T>,
    delay: D,
    options: Options,
    profiles: ProfileTable,
    commands: Option<Vec<u8>>,
    identity: Option<Identity>,
    profile: Option<Profile>,
}

impl<T, D> Programmer<T, D>
where
    T: Transport,
    D: DelayMs<u32>,
{
    /// Create a programmer using the built-in device table
    pub fn new(transport: T, delay: D, options: Options) -> Self {
        Self::with_profiles(transport, delay, options, ProfileTable::builtin().profiles())
    }

    /// Create a programmer using an alternative device table
    pub fn with_profiles(transport: T, delay: D, options: Options, profiles: &'static [Profile]) -> Self {
        Self {
            session: Session::new(transport),
            delay,
            options,
            profiles: ProfileTable::new(profiles),
            commands: None,
            identity: None,
            profile: None,
        }
    }

    pub fn state(&self) -> State {
        self.session.state()
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn profiles(&self) -> &ProfileTable {
        &self.profiles
    }

    /// Opcodes advertised by the last Get
    pub fn supported_commands(&self) -> Option<&[u8]> {
        self.commands.as_deref()
    }

    /// Use `profile` for range checks and planning, e.g. a generic profile
    /// for a device missing from the table
    pub fn set_profile(&mut self, profile: Profile) {
        self.profile = Some(profile);
    }

    pub fn transport(&self) -> &T {
        self.session.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.session.transport_mut()
    }

    pub fn into_transport(self) -> T {
        self.session.into_transport()
    }

    /// Profile in use, required by planned memory operations
    pub fn active_profile(&self) -> Result<Profile, Error<T::Error>> {
        match (&self.profile, &self.identity) {
            (Some(p), _) => Ok(*p),
            (None, Some(id)) => Err(Error::UnknownDeviceProfile(id.product_id)),
            (None, None) => Err(Error::NotConnected),
        }
    }

    /// Reset the target (unless disabled), synchronise, and identify it
    pub fn connect(&mut self) -> Result<Identity, Error<T::Error>> {
        if !self.options.no_reset {
            self.session.transport_mut().reset().map_err(Error::Serial)?;
            self.delay.delay_ms(self.options.init_delay_ms);
        }

        self.sync()?;

        let info = self.get()?;
        let product_id = self.get_id()?;

        let identity = Identity { product_id, bootloader_version: info.version, bootloader_id: None };
        self.identity = Some(identity);
        self.profile = self.profiles.profile_for(product_id, None).copied();

        match &self.profile {
            Some(p) => info!(
                "Detected {} (product id {:#05x}, bootloader v{})",
                p.name,
                product_id,
                format_version(info.version)
            ),
            None => warn!("No profile for product id {:#05x}", product_id),
        }

        Ok(identity)
    }

    /// Run the handshake with the configured budget
    pub fn sync(&mut self) -> Result<(), Error<T::Error>> {
        self.session.sync(self.options.sync_attempts, self.options.sync_timeout_ms)
    }

    /// Read the bootloader ID byte and refine the profile where the table
    /// holds several variants of the product
    pub fn detect_bootloader_id(&mut self) -> Result<Option<u8>, Error<T::Error>> {
        let profile = self.active_profile()?;
        let address = match profile.bootloader_id_address() {
            Some(a) => a,
            None => return Ok(None),
        };

        let id = self.read_memory(address, 1)?[0];
        debug!("Bootloader ID: {:#04x}", id);

        if let Some(identity) = self.identity.as_mut() {
            identity.bootloader_id = Some(id);
            if let Some(p) = self.profiles.profile_for(identity.product_id, Some(id)) {
                self.profile = Some(*p);
            }
        }

        Ok(Some(id))
    }

    fn ensure_supported(&self, command: Command) -> Result<(), Error<T::Error>> {
        match &self.commands {
            Some(c) if !c.contains(&command.opcode()) => {
                debug!("{:?} not in bootloader command list", command);
                Err(Error::UnsupportedCommand(command))
            }
            _ => Ok(()),
        }
    }

    fn check_range(&self, address: u32, length: usize) -> Result<(), Error<T::Error>> {
        match &self.profile {
            Some(p) if !p.contains(address, length) => Err(Error::AddressOutOfRange { address, length }),
            _ => Ok(()),
        }
    }

    /// Issue `command` as the frame sequence `frames` and collect `response`
    pub fn execute(
        &mut self,
        command: Command,
        frames: &[Frame],
        response: Response,
    ) -> Result<Vec<u8>, Error<T::Error>> {
        if !self.session.is_synced() {
            return Err(Error::NotConnected);
        }
        self.ensure_supported(command)?;

        if frames.is_empty() {
            return Err(Error::InvalidArgument("command without frames"));
        }

        let mut budget = RetryBudget::new(self.options.retries);
        let mut timed_out = false;

        while budget.try_attempt() {
            match self.attempt(command, frames, response) {
                Ok(data) => {
                    self.complete(command)?;
                    return Ok(data);
                }
                Err(Failure::Nack) => {
                    debug!("{:?} nacked (attempt {}/{})", command, budget.attempts(), self.options.retries);
                    timed_out = false;
                }
                Err(Failure::Timeout) => {
                    debug!("{:?} not acknowledged (attempt {}/{})", command, budget.attempts(), self.options.retries);
                    timed_out = true;
                }
                Err(Failure::Fatal(e)) => {
                    if let Error::InvalidResponse(_) = e {
                        self.session.fail();
                    }
                    return Err(e);
                }
            }
        }

        error!("{:?} failed after {} attempts", command, budget.attempts());

        if timed_out {
            Err(Error::Timeout)
        } else {
            Err(Error::CommandRejected { command, attempts: budget.attempts() })
        }
    }

    fn attempt(
        &mut self,
        command: Command,
        frames: &[Frame],
        response: Response,
    ) -> Result<Vec<u8>, Failure<T::Error>> {
        let timeout = self.options.response_timeout_ms;
        let completion_timeout = if command.is_slow() { self.options.erase_timeout_ms } else { timeout };
        let last = frames.len() - 1;

        for (i, frame) in frames.iter().enumerate() {
            trace!("{:?} frame {}: {:02x?}", command, i, frame.as_bytes());
            self.session.transport_mut().write(frame.as_bytes()).map_err(Error::Serial)?;

            let t = if i == last && response == Response::None { completion_timeout } else { timeout };
            match self.read_ack(t) {
                Err(Failure::Timeout) if i > 0 => return Err(Failure::Fatal(Error::Timeout)),
                r => r?,
            }
        }

        let data = match response {
            Response::None => Vec::new(),
            Response::Ack => {
                self.read_final_ack(completion_timeout)?;
                Vec::new()
            }
            Response::Fixed(n) => {
                let data = self.read_bytes(n, timeout)?;
                self.read_final_ack(timeout)?;
                data
            }
            Response::Counted => {
                let n = self.read_bytes(1, timeout)?[0] as usize + 1;
                let data = self.read_bytes(n, timeout)?;
                self.read_final_ack(timeout)?;
                data
            }
            Response::Raw(n) => self.read_bytes(n, timeout)?,
        };

        Ok(data)
    }

    fn read_ack(&mut self, timeout_ms: u32) -> Result<(), Failure<T::Error>> {
        let mut b = [0u8; 1];
        match self.session.transport_mut().read_exact(&mut b, timeout_ms) {
            Ok(()) => (),
            Err(TransportError::Timeout) => return Err(Failure::Timeout),
            Err(TransportError::Io(e)) => return Err(Failure::Fatal(Error::Serial(e))),
        }

        match decode_ack(b[0]) {
            Reply::Ack => Ok(()),
            Reply::Nack => Err(Failure::Nack),
            Reply::Unknown(v) => {
                debug!("Received unexpected value: 0x{:02x}", v);
                Err(Failure::Fatal(Error::InvalidResponse(v)))
            }
        }
    }

    fn read_final_ack(&mut self, timeout_ms: u32) -> Result<(), Failure<T::Error>> {
        match self.read_ack(timeout_ms) {
            Err(Failure::Timeout) => Err(Failure::Fatal(Error::Timeout)),
            r => r,
        }
    }

    fn read_bytes(&mut self, n: usize, timeout_ms: u32) -> Result<Vec<u8>, Failure<T::Error>> {
        let mut buff = vec![0u8; n];
        self.session
            .transport_mut()
            .read_exact(&mut buff, timeout_ms)
            .map_err(|e| Failure::Fatal(e.into()))?;
        Ok(buff)
    }

    /// Session bookkeeping once a command has fully succeeded
    fn complete(&mut self, command: Command) -> Result<(), Error<T::Error>> {
        if command == Command::Go {
            self.session.close();
        } else if command.resets_target() {
            self.resync()?;
        }
        Ok(())
    }

    /// Handshake again after the target reset itself, with a fresh budget
    fn resync(&mut self) -> Result<(), Error<T::Error>> {
        info!("Target resetting, waiting {} ms to reconnect", self.options.reset_delay_ms);

        self.session.reset();
        self.delay.delay_ms(self.options.reset_delay_ms);

        self.sync()?;
        self.get()?;

        Ok(())
    }

    /// Fetch the bootloader version and supported commands
    pub fn get(&mut self) -> Result<BootloaderInfo, Error<T::Error>> {
        let data = self.execute(Command::Get, &[Frame::command(Command::Get)], Response::Counted)?;
        let (version, commands) = data.split_first().ok_or(Error::ChecksumMismatch)?;

        let info = BootloaderInfo { version: *version, commands: commands.to_vec() };
        debug!("Bootloader v{}, commands: {:02x?}", format_version(info.version), info.commands);

        self.session.set_extended_erase(info.supports(Command::ExtendedErase));
        self.commands = Some(info.commands.clone());

        Ok(info)
    }

    /// Fetch the bootloader version and option bytes
    pub fn get_version(&mut self) -> Result<Version, Error<T::Error>> {
        let c = Command::GetVersionReadStatus;
        let data = self.execute(c, &[Frame::command(c)], Response::Fixed(3))?;

        Ok(Version { version: data[0], option_bytes: [data[1], data[2]] })
    }

    /// Fetch the product ID
    pub fn get_id(&mut self) -> Result<u16, Error<T::Error>> {
        let data = self.execute(Command::GetId, &[Frame::command(Command::GetId)], Response::Counted)?;

        match data.as_slice() {
            [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(Error::ChecksumMismatch),
        }
    }

    /// Read up to 256 bytes
    pub fn read_memory(&mut self, address: u32, length: usize) -> Result<Vec<u8>, Error<T::Error>> {
        if length == 0 || length > MAX_CHUNK {
            return Err(Error::InvalidArgument("read length must be between 1 and 256 bytes"));
        }
        self.check_range(address, length)?;

        let c = Command::ReadMemory;
        let frames = [Frame::command(c), Frame::address(address), Frame::encode(&[(length - 1) as u8])];

        self.execute(c, &frames, Response::Raw(length))
    }

    /// Write up to 256 bytes, padded to a word multiple with 0xFF
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), Error<T::Error>> {
        if data.is_empty() || data.len() > MAX_CHUNK {
            return Err(Error::InvalidArgument("write length must be between 1 and 256 bytes"));
        }
        self.check_range(address, data.len())?;

        let mut padded = data.to_vec();
        while padded.len() % 4 != 0 {
            padded.push(0xFF);
        }

        let c = Command::WriteMemory;
        let frames = [Frame::command(c), Frame::address(address), Frame::counted(&padded)];
        self.execute(c, &frames, Response::None)?;

        Ok(())
    }

    /// Start execution at `address`, ending the session
    pub fn go(&mut self, address: u32) -> Result<(), Error<T::Error>> {
        if let Some(p) = &self.profile {
            if !p.is_executable(address) {
                return Err(Error::AddressOutOfRange { address, length: 0 });
            }
        }

        info!("Starting execution at {:#010x}", address);

        let c = Command::Go;
        self.execute(c, &[Frame::command(c), Frame::address(address)], Response::None)?;

        Ok(())
    }

    /// Erase command to use for this device and bootloader
    pub fn erase_strategy(&self) -> Result<EraseStrategy, Error<T::Error>> {
        let (legacy, extended) = match &self.commands {
            Some(c) => (c.contains(&Command::Erase.opcode()), self.session.extended_erase()),
            None => (true, true),
        };

        let strategy = match &self.profile {
            Some(p) => EraseStrategy::resolve(p, legacy, extended),
            None if extended => Some(EraseStrategy::Extended),
            None if legacy => Some(EraseStrategy::Legacy),
            None => None,
        };

        strategy.ok_or(Error::UnsupportedCommand(Command::Erase))
    }

    /// Erase pages with the legacy command
    pub fn erase_pages(&mut self, pages: &[u8]) -> Result<(), Error<T::Error>> {
        if pages.is_empty() || pages.len() > MAX_LEGACY_ERASE_PAGES {
            return Err(Error::InvalidArgument("legacy erase takes 1 to 255 pages"));
        }

        debug!("Erasing pages {:?}", pages);

        let c = Command::Erase;
        self.execute(c, &[Frame::command(c), Frame::counted(pages)], Response::None)?;

        Ok(())
    }

    /// Erase pages with the two byte page number command
    pub fn extended_erase(&mut self, pages: &[u16]) -> Result<(), Error<T::Error>> {
        if pages.is_empty() || pages.len() > MAX_EXTENDED_ERASE_PAGES {
            return Err(Error::InvalidArgument("extended erase takes 1 to 65520 pages"));
        }

        debug!("Erasing {} pages from {}", pages.len(), pages[0]);

        let mut payload = Vec::with_capacity(pages.len() * 2 + 2);
        payload.extend_from_slice(&((pages.len() - 1) as u16).to_be_bytes());
        for p in pages {
            payload.extend_from_slice(&p.to_be_bytes());
        }

        let c = Command::ExtendedErase;
        self.execute(c, &[Frame::command(c), Frame::encode(&payload)], Response::None)?;

        Ok(())
    }

    /// Global or bank erase
    pub fn mass_erase(&mut self, kind: MassErase) -> Result<(), Error<T::Error>> {
        info!("Mass erase ({:?})", kind);

        match self.erase_strategy()? {
            EraseStrategy::Legacy if kind != MassErase::All => {
                Err(Error::InvalidArgument("bank erase requires extended erase"))
            }
            EraseStrategy::Legacy => {
                let c = Command::Erase;
                self.execute(c, &[Frame::command(c), Frame::encode(&[0xFF])], Response::None)?;
                Ok(())
            }
            EraseStrategy::Extended => {
                let c = Command::ExtendedErase;
                let code = kind.extended_code().to_be_bytes();
                self.execute(c, &[Frame::command(c), Frame::encode(&code)], Response::None)?;
                Ok(())
            }
        }
    }

    /// Enable write protection on the given sectors, resetting the target
    pub fn write_protect(&mut self, sectors: &[u8]) -> Result<(), Error<T::Error>> {
        if sectors.is_empty() || sectors.len() > MAX_CHUNK {
            return Err(Error::InvalidArgument("write protect takes 1 to 256 sectors"));
        }

        let c = Command::WriteProtect;
        self.execute(c, &[Frame::command(c), Frame::counted(sectors)], Response::None)?;

        Ok(())
    }

    /// Disable write protection, resetting the target
    pub fn write_unprotect(&mut self) -> Result<(), Error<T::Error>> {
        let c = Command::WriteUnprotect;
        self.execute(c, &[Frame::command(c)], Response::Ack)?;
        Ok(())
    }

    /// Enable readout protection, resetting the target
    pub fn readout_protect(&mut self) -> Result<(), Error<T::Error>> {
        let c = Command::ReadoutProtect;
        self.execute(c, &[Frame::command(c)], Response::Ack)?;
        Ok(())
    }

    /// Disable readout protection, mass erasing flash and resetting the target
    pub fn readout_unprotect(&mut self) -> Result<(), Error<T::Error>> {
        warn!("Readout unprotect erases the whole flash");

        let c = Command::ReadoutUnprotect;
        self.execute(c, &[Frame::command(c)], Response::Ack)?;
        Ok(())
    }

    /// Switch the link to `baud` (125k, 250k, 500k or 1M)
    pub fn set_speed(&mut self, baud: u32) -> Result<(), Error<T::Error>> {
        let code = speed_code(baud).ok_or(Error::InvalidArgument("unsupported bootloader baud rate"))?;

        let c = Command::Speed;
        self.execute(c, &[Frame::command(c), Frame::encode(&[code])], Response::None)?;

        self.session.set_baud(baud).map_err(Error::Serial)?;

        // The bootloader confirms with a second ACK at the new rate
        match self.read_final_ack(self.options.response_timeout_ms) {
            Ok(()) => Ok(()),
            Err(failure) => {
                error!("No confirmation at {} baud", baud);
                self.session.fail();
                Err(match failure {
                    Failure::Fatal(e) => e,
                    Failure::Timeout => Error::Timeout,
                    Failure::Nack => Error::CommandRejected { command: c, attempts: 1 },
                })
            }
        }
    }

    /// CRC over `words` 32-bit words from `address`
    pub fn get_checksum(
        &mut self,
        address: u32,
        words: u32,
        polynomial: u32,
        initial: u32,
    ) -> Result<u32, Error<T::Error>> {
        if words == 0 {
            return Err(Error::InvalidArgument("checksum over zero words"));
        }
        let length = usize::try_from(words)
            .ok()
            .and_then(|w| w.checked_mul(4))
            .ok_or(Error::InvalidArgument("checksum length overflows"))?;
        self.check_range(address, length)?;

        let c = Command::GetChecksum;
        let frames = [
            Frame::command(c),
            Frame::address(address),
            Frame::encode(&words.to_be_bytes()),
            Frame::encode(&polynomial.to_be_bytes()),
            Frame::encode(&initial.to_be_bytes()),
        ];
        let data = self.execute(c, &frames, Response::Raw(5))?;

        if checksum(&data[..4]) != data[4] {
            return Err(Error::ChecksumMismatch);
        }

        Ok(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
    }
}
