//! A depot that keeps its state in a directory.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use log::{debug, trace};
use openssl::bn::BigNum;
use openssl::x509::X509Ref;

use crate::commons::CertDepotResult;
use crate::commons::error::Error;
use crate::commons::file::{self, IoError};
use crate::constants::{
    CA_CERT_FILE, CA_KEY_FILE, SERIAL_FILE, SERIAL_FILE_MODE,
    SERIAL_LOCK_FILE,
};
use crate::distribution::{DistributionClient, DistributionRequest};
use super::{serial, CaMaterial, Depot};


//------------ FileDepot -----------------------------------------------------

/// A depot using files in a directory.
///
/// The CA certificate chain lives in `ca.pem` and the CA key in `ca.key`,
/// both PEM encoded. The next serial number is kept in `serial` as
/// lowercase hex, readable by the owner only. Allocating a serial holds an
/// advisory lock on `.serial.lock`, so several processes can safely share
/// the same directory.
///
/// Issued certificates are not kept. They are handed to the distribution
/// authority through the [`DistributionClient`].
#[derive(Debug)]
pub struct FileDepot {
    dir: PathBuf,
    distribution: DistributionClient,
}

impl FileDepot {
    pub fn new(dir: impl Into<PathBuf>, distribution: DistributionClient) -> Self {
        FileDepot { dir: dir.into(), distribution }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cert_path(&self) -> PathBuf {
        self.dir.join(CA_CERT_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(CA_KEY_FILE)
    }

    pub fn serial_path(&self) -> PathBuf {
        self.dir.join(SERIAL_FILE)
    }

    fn serial_lock_path(&self) -> PathBuf {
        self.dir.join(SERIAL_LOCK_FILE)
    }

    /// Writes new CA material into the depot directory `dir`.
    ///
    /// Refuses to replace an existing certificate or key. The PEM data is
    /// written as given, so an encrypted key stays encrypted.
    pub fn install_ca(
        dir: &Path, cert_pem: &[u8], key_pem: &[u8],
    ) -> Result<(), IoError> {
        file::save_new(cert_pem, &dir.join(CA_CERT_FILE), 0o644)?;
        file::save_new(key_pem, &dir.join(CA_KEY_FILE), 0o600)?;
        debug!("Installed CA material in '{}'", dir.display());
        Ok(())
    }

    fn read_ca_file(
        path: &Path, to_err: fn(String) -> Error,
    ) -> CertDepotResult<Vec<u8>> {
        file::read(path).map_err(|e| to_err(e.to_string()))
    }
}

impl Depot for FileDepot {
    fn ca(&self, pass: &[u8]) -> CertDepotResult<CaMaterial> {
        let cert_pem = Self::read_ca_file(&self.cert_path(), Error::CertLoad)?;
        let chain = super::parse_cert_chain(&cert_pem)?;

        let key_pem = Self::read_ca_file(&self.key_path(), Error::KeyLoad)?;
        let key = super::parse_rsa_key(&key_pem, pass)?;

        CaMaterial::new(chain, key)
    }

    fn serial(&self) -> CertDepotResult<BigNum> {
        file::create_dir(&self.dir)?;

        let mut lock = FileLock::create(&self.serial_lock_path())?;
        let _guard = lock.write()?;

        let path = self.serial_path();
        let current = match file::read_opt(&path)? {
            Some(content) => serial::decode(&content)?,
            None => {
                debug!(
                    "No serial number in '{}', starting at a random one",
                    self.dir.display()
                );
                serial::random().map_err(|e| {
                    Error::signing(format!("cannot create serial number: {e}"))
                })?
            }
        };
        let next = serial::next(&current).map_err(|e| {
            Error::signing(format!("cannot increment serial number: {e}"))
        })?;

        file::save_atomic(serial::encode(&next).as_bytes(), &path, SERIAL_FILE_MODE)?;
        trace!("Allocated serial number in '{}'", self.dir.display());

        Ok(current)
    }

    fn distribute(
        &self,
        name: &str,
        allow_renewal_days: u32,
        cert: &X509Ref,
    ) -> CertDepotResult<bool> {
        let request = DistributionRequest::new(name, allow_renewal_days, cert)?;
        self.distribution.distribute(&request)?;
        Ok(true)
    }
}


//------------ FileLock ------------------------------------------------------

#[derive(Debug)]
struct FileLock {
    lock: fd_lock::RwLock<File>,
}

impl FileLock {
    fn create(path: &Path) -> Result<Self, IoError> {
        let mut options = OpenOptions::new();
        options.create(true).truncate(false).read(true).write(true);
        let lock_file = options.open(path).map_err(|err| {
            IoError::new(
                format!("failed to open lock file '{}'", path.display()),
                err
            )
        })?;

        Ok(FileLock { lock: fd_lock::RwLock::new(lock_file) })
    }

    fn write(
        &mut self,
    ) -> Result<fd_lock::RwLockWriteGuard<'_, File>, IoError> {
        self.lock.write().map_err(|err| {
            IoError::new("cannot get file lock", err)
        })
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::commons::crypto::bn_to_hex;
    use crate::test;

    fn depot(dir: &Path) -> FileDepot {
        FileDepot::new(dir, test::unreachable_distribution())
    }

    #[test]
    fn first_serial_is_random_and_next_is_stored() {
        test::test_under_tmp(|d| {
            let depot = depot(&d);
            let first = depot.serial().unwrap();
            assert!(first.num_bits() > 0);

            let stored = file::read(&depot.serial_path()).unwrap();
            let expected = serial::encode(&serial::next(&first).unwrap());
            assert_eq!(stored, expected.as_bytes());

            let second = depot.serial().unwrap();
            assert_eq!(second, serial::next(&first).unwrap());
        })
    }

    #[test]
    fn serial_continues_from_stored_value() {
        test::test_under_tmp(|d| {
            let depot = depot(&d);
            file::save_atomic(b"0a\n", &depot.serial_path(), 0o400).unwrap();
            assert_eq!(bn_to_hex(&depot.serial().unwrap()), "0a");
            assert_eq!(bn_to_hex(&depot.serial().unwrap()), "0b");
        })
    }

    #[test]
    fn corrupt_serial_is_format_error() {
        test::test_under_tmp(|d| {
            let depot = depot(&d);
            file::save_atomic(b"not hex\n", &depot.serial_path(), 0o400)
                .unwrap();
            let err = depot.serial().unwrap_err();
            assert!(matches!(err, Error::SerialFormat(_)));
            assert!(err.to_string().contains("not hex"));
        })
    }

    #[test]
    fn unreadable_serial_is_io_error() {
        test::test_under_tmp(|d| {
            let depot = depot(&d);
            std::fs::create_dir_all(depot.serial_path()).unwrap();
            let err = depot.serial().unwrap_err();
            assert!(matches!(err, Error::SerialIo(_)), "{err}");
        })
    }

    #[test]
    fn serial_in_missing_dir_is_created() {
        test::test_under_tmp(|d| {
            let depot = depot(&d.join("nested").join("depot"));
            depot.serial().unwrap();
            assert!(depot.serial_path().exists());
        })
    }

    #[cfg(unix)]
    #[test]
    fn serial_file_is_owner_read_only() {
        use std::os::unix::fs::PermissionsExt;

        test::test_under_tmp(|d| {
            let depot = depot(&d);
            depot.serial().unwrap();
            depot.serial().unwrap();
            let mode = std::fs::metadata(depot.serial_path())
                .unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o400);
        })
    }

    #[test]
    fn concurrent_serials_are_unique() {
        test::test_under_tmp(|d| {
            let dir: Arc<Path> = d.into();
            let handles: Vec<_> = (0..8).map(|_| {
                let dir = dir.clone();
                thread::spawn(move || {
                    // Separate depots, as separate processes would have.
                    let depot = depot(&dir);
                    (0..16).map(|_| {
                        bn_to_hex(&depot.serial().unwrap())
                    }).collect::<Vec<_>>()
                })
            }).collect();

            let mut seen = HashSet::new();
            for handle in handles {
                for serial in handle.join().unwrap() {
                    assert!(seen.insert(serial), "duplicate serial");
                }
            }
            assert_eq!(seen.len(), 8 * 16);
        })
    }

    #[test]
    fn ca_without_key_is_key_load_error() {
        test::test_under_tmp(|d| {
            let depot = depot(&d);
            let (cert_pem, _) = test::ca_pem(None);
            file::save_new(&cert_pem, &depot.cert_path(), 0o644).unwrap();

            let err = depot.ca(b"").unwrap_err();
            assert!(matches!(err, Error::KeyLoad(_)), "{err}");
        })
    }

    #[test]
    fn ca_without_cert_is_cert_load_error() {
        test::test_under_tmp(|d| {
            let depot = depot(&d);
            let err = depot.ca(b"").unwrap_err();
            assert!(matches!(err, Error::CertLoad(_)), "{err}");
        })
    }

    #[test]
    fn install_and_load_ca() {
        test::test_under_tmp(|d| {
            let depot = depot(&d);
            let (cert_pem, key_pem) = test::ca_pem(Some("pass"));
            FileDepot::install_ca(&d, &cert_pem, &key_pem).unwrap();

            let ca = depot.ca(b"pass").unwrap();
            assert!(ca.issuer().verify(ca.key()).unwrap());
            assert!(matches!(depot.ca(b"wrong"), Err(Error::KeyLoad(_))));

            // No overwriting.
            assert!(FileDepot::install_ca(&d, &cert_pem, &key_pem).is_err());
        })
    }
}
