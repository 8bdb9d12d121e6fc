//! Password protection at rest
//!
//! On Windows the password is sealed with DPAPI (current-user scope) and
//! stored as hex. Other platforms have no equivalent per-user store, so the
//! UTF-8 bytes are only hex-encoded.

use super::ConfigError;

#[cfg(windows)]
pub fn protect(plain: &str) -> Result<String, ConfigError> {
    let sealed = dpapi::seal(plain.as_bytes())?;
    Ok(hex::encode(sealed))
}

#[cfg(windows)]
pub fn unprotect(stored: &str) -> Result<String, ConfigError> {
    let sealed = hex::decode(stored.trim())
        .map_err(|e| ConfigError::Protection(format!("invalid hex: {}", e)))?;
    let plain = dpapi::open(&sealed)?;
    String::from_utf8(plain).map_err(|e| ConfigError::Protection(e.to_string()))
}

#[cfg(not(windows))]
pub fn protect(plain: &str) -> Result<String, ConfigError> {
    tracing::warn!("No OS credential protection on this platform, password is only hex-encoded");
    Ok(hex::encode(plain.as_bytes()))
}

#[cfg(not(windows))]
pub fn unprotect(stored: &str) -> Result<String, ConfigError> {
    let bytes = hex::decode(stored.trim())
        .map_err(|e| ConfigError::Protection(format!("invalid hex: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| ConfigError::Protection(e.to_string()))
}

#[cfg(windows)]
mod dpapi {
    use super::ConfigError;
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{LocalFree, HLOCAL};
    use windows::Win32::Security::Cryptography::{
        CryptProtectData, CryptUnprotectData, CRYPTPROTECT_UI_FORBIDDEN, CRYPT_INTEGER_BLOB,
    };

    fn input_blob(data: &[u8]) -> CRYPT_INTEGER_BLOB {
        CRYPT_INTEGER_BLOB {
            cbData: data.len() as u32,
            pbData: data.as_ptr() as *mut u8,
        }
    }

    /// Copy a DPAPI output blob and release it
    unsafe fn take_blob(blob: CRYPT_INTEGER_BLOB) -> Vec<u8> {
        let bytes = std::slice::from_raw_parts(blob.pbData, blob.cbData as usize).to_vec();
        let _ = LocalFree(HLOCAL(blob.pbData as _));
        bytes
    }

    pub fn seal(plain: &[u8]) -> Result<Vec<u8>, ConfigError> {
        let input = input_blob(plain);
        let mut output = CRYPT_INTEGER_BLOB::default();
        unsafe {
            CryptProtectData(
                &input,
                PCWSTR::null(),
                None,
                None,
                None,
                CRYPTPROTECT_UI_FORBIDDEN,
                &mut output,
            )
            .map_err(|e| ConfigError::Protection(e.to_string()))?;
            Ok(take_blob(output))
        }
    }

    pub fn open(sealed: &[u8]) -> Result<Vec<u8>, ConfigError> {
        let input = input_blob(sealed);
        let mut output = CRYPT_INTEGER_BLOB::default();
        unsafe {
            CryptUnprotectData(
                &input,
                None,
                None,
                None,
                None,
                CRYPTPROTECT_UI_FORBIDDEN,
                &mut output,
            )
            .map_err(|e| ConfigError::Protection(e.to_string()))?;
            Ok(take_blob(output))
        }
    }
}
