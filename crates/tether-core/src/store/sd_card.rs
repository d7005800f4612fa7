use core::fmt::Write as _;

use embedded_sdmmc::{
    BlockDevice, Error as SdError, Mode, TimeSource, Timestamp, VolumeIdx, VolumeManager,
};
use heapless::String;
use log::{debug, error};

use super::{CredentialStore, StoreError};

/// Directory on the card that holds one file per configuration key
pub const NAMESPACE_DIR: &str = "STORAGE";

const FILE_EXTENSION: &str = "CFG";

/// 8.3 name: up to eight characters, a dot and the extension
type FileName = String<12>;

/// Map a store key to its file name inside [`NAMESPACE_DIR`].
///
/// Keys are short lowercase identifiers; FAT short names are uppercase.
pub fn key_file_name(key: &str) -> Result<FileName, StoreError> {
    if key.is_empty() || key.len() > 8 || !key.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(StoreError::Medium);
    }

    let mut name = FileName::new();
    for ch in key.chars() {
        name.push(ch.to_ascii_uppercase()).map_err(|_| StoreError::Medium)?;
    }
    write!(name, ".{FILE_EXTENSION}").map_err(|_| StoreError::Medium)?;
    Ok(name)
}

/// Check a stored file's length against the destination capacity before
/// any of it is read.
fn check_length<const N: usize>(length: u32) -> Result<usize, StoreError> {
    usize::try_from(length)
        .ok()
        .filter(|&length| length <= N)
        .ok_or(StoreError::TooLarge)
}

fn decode_value<const N: usize>(bytes: &[u8]) -> Result<String<N>, StoreError> {
    let text = core::str::from_utf8(bytes).map_err(|_| StoreError::Medium)?;
    String::try_from(text).map_err(|_| StoreError::TooLarge)
}

/// Timestamps for files written before wall-clock time is known.
///
/// The node never learns the time of day, so every file carries the FAT epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedTimeSource;

impl TimeSource for FixedTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 10,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// Credential store on the first FAT volume of an SD card.
///
/// These operations are blocking. They only run during provisioning, before
/// anything else competes for the SPI bus.
pub struct SdCardStore<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    volume_mgr: VolumeManager<D, T, 4, 4, 1>,
}

impl<D, T> SdCardStore<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    /// Open the card and make sure the namespace directory exists.
    ///
    /// Failing here means the medium itself is unusable, which is the one
    /// condition allowed to abort startup.
    pub fn open(block_device: D, ts: T) -> Result<Self, StoreError> {
        let store = Self {
            volume_mgr: VolumeManager::new(block_device, ts),
        };
        store.ensure_namespace().map_err(|e| {
            error!("SD card initialisation failed: {:?}", e);
            StoreError::Medium
        })?;
        Ok(store)
    }

    fn ensure_namespace(&self) -> Result<(), SdError<D::Error>> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;

        match root_dir.open_dir(NAMESPACE_DIR) {
            Ok(dir) => dir.close()?,
            Err(SdError::NotFound) => {
                debug!("Creating {} directory", NAMESPACE_DIR);
                root_dir.make_dir_in_dir(NAMESPACE_DIR)?;
            }
            Err(e) => return Err(e),
        }

        root_dir.close()?;
        volume0.close()?;
        Ok(())
    }

    fn write_file(&self, file_name: &str, value: &str) -> Result<(), SdError<D::Error>> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        let dir = root_dir.open_dir(NAMESPACE_DIR)?;

        let file = dir.open_file_in_dir(file_name, Mode::ReadWriteCreateOrTruncate)?;
        file.write(value.as_bytes())?;

        // Closing flushes the directory entry; errors here mean the value is not durable.
        file.close()?;
        dir.close()?;
        root_dir.close()?;
        volume0.close()?;
        Ok(())
    }

    fn read_file<const N: usize>(
        &self,
        file_name: &str,
    ) -> Result<Result<String<N>, StoreError>, SdError<D::Error>> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        let dir = root_dir.open_dir(NAMESPACE_DIR)?;
        let file = dir.open_file_in_dir(file_name, Mode::ReadOnly)?;

        let result = match check_length::<N>(file.length()) {
            Err(e) => Err(e),
            Ok(length) => {
                let mut buffer = [0u8; N];
                let mut filled = 0;
                while filled < length {
                    let bytes_read = file.read(&mut buffer[filled..length])?;
                    if bytes_read == 0 {
                        break; // EOF
                    }
                    filled += bytes_read;
                }
                decode_value(&buffer[..filled])
            }
        };

        file.close()?;
        dir.close()?;
        root_dir.close()?;
        volume0.close()?;
        Ok(result)
    }
}

impl<D, T> CredentialStore for SdCardStore<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    fn store(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let file_name = key_file_name(key)?;
        self.write_file(&file_name, value).map_err(|e| {
            error!("Failed to write {} to SD card: {:?}", file_name, e);
            StoreError::WriteFailed
        })
    }

    fn load<const N: usize>(&self, key: &str) -> Result<String<N>, StoreError> {
        let file_name = key_file_name(key)?;
        match self.read_file::<N>(&file_name) {
            Ok(result) => result,
            Err(SdError::NotFound) => Err(StoreError::NotFound),
            Err(e) => {
                error!("Failed to read {} from SD card: {:?}", file_name, e);
                Err(StoreError::Medium)
            }
        }
    }
}
