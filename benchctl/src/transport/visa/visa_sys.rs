use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use benchctl_protocol::{TransportError, TransportResult};
use dlopen::wrapper::{Container, WrapperApi};

cfg_if::cfg_if! {
    if #[cfg(all(windows, target_pointer_width = "64"))] {
        pub const DEFAULT_VISA_LIB: &str = "visa64.dll";
    } else if #[cfg(windows)] {
        pub const DEFAULT_VISA_LIB: &str = "visa32.dll";
    } else if #[cfg(target_os = "macos")] {
        pub const DEFAULT_VISA_LIB: &str = "/Library/Frameworks/VISA.framework/VISA";
    } else {
        pub const DEFAULT_VISA_LIB: &str = "libvisa.so";
    }
}

type ViStatus = i32;
type ViAccessMode = u32;
type ViSession = u32;
type ViObject = u32;
type ViFindList = u32;
type ViAttr = u32;
// ViUInt32 on 32-bit and ViUInt64 on 64-bit platforms
type ViAttrState = usize;

const VI_SUCCESS_MAX_CNT: ViStatus = 0x3FFF_0006;
const VI_ERROR_RSRC_NFOUND: ViStatus = 0xBFFF_0011_u32 as ViStatus;
const VI_ERROR_TMO: ViStatus = 0xBFFF_0015_u32 as ViStatus;
const VI_ATTR_TMO_VALUE: ViAttr = 0x3FFF_001A;
const VI_NO_LOCK: ViAccessMode = 0;
const VI_FIND_BUFLEN: usize = 256;
const READ_CHUNK: usize = 1024;
const OPEN_TIMEOUT_MS: u32 = 0;

#[allow(non_snake_case)]
#[derive(WrapperApi)]
struct Api {
    viOpenDefaultRM: unsafe extern "C" fn(vi: *mut ViSession) -> ViStatus,
    viFindRsrc: unsafe extern "C" fn(
        session: ViSession,
        expr: *const c_char,
        find_list: *mut ViFindList,
        ret_cnt: *mut u32,
        desc: *mut c_char,
    ) -> ViStatus,
    viFindNext: unsafe extern "C" fn(find_list: ViFindList, desc: *mut c_char) -> ViStatus,
    viOpen: unsafe extern "C" fn(
        session: ViSession,
        rsrc: *const c_char,
        access_mode: ViAccessMode,
        timeout: u32,
        vi: *mut ViSession,
    ) -> ViStatus,
    viClose: unsafe extern "C" fn(vi: ViObject) -> ViStatus,
    viSetAttribute: unsafe extern "C" fn(vi: ViObject, attr: ViAttr, value: ViAttrState) -> ViStatus,
    viStatusDesc: unsafe extern "C" fn(vi: ViObject, status: ViStatus, desc: *mut c_char) -> ViStatus,
    viRead: unsafe extern "C" fn(vi: ViSession, buf: *mut u8, cnt: u32, ret_cnt: *mut u32) -> ViStatus,
    viWrite: unsafe extern "C" fn(vi: ViSession, buf: *const u8, cnt: u32, ret_cnt: *mut u32) -> ViStatus,
    viClear: unsafe extern "C" fn(vi: ViSession) -> ViStatus,
}

/// A loaded VISA library together with its default resource manager session.
pub struct Visa {
    api: Container<Api>,
    rm: ViSession,
    path: String,
}

// VISA sessions may be used from any thread, each instrument is only driven by its own worker.
unsafe impl Send for Visa {}
unsafe impl Sync for Visa {}

fn c_string(value: &str) -> TransportResult<CString> {
    CString::new(value).map_err(|_| anyhow!("`{}` contains a nul byte", value).into())
}

fn from_buffer(buf: &[c_char]) -> String {
    unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().into_owned()
}

impl Visa {
    pub fn load(path: &str) -> TransportResult<Arc<Visa>> {
        log::debug!("Loading VISA library from `{}`", path);
        let api: Container<Api> = unsafe { Container::load(path) }.map_err(|err| TransportError::LibraryLoad {
            path: path.to_string(),
            reason: err.to_string(),
        })?;
        let mut rm: ViSession = 0;
        let status = unsafe { api.viOpenDefaultRM(&mut rm as *mut ViSession) };
        if status < 0 {
            return Err(TransportError::Visa {
                code: status,
                description: "Could not open default resource manager".to_string(),
            });
        }
        Ok(Arc::new(Visa {
            api,
            rm,
            path: path.to_string(),
        }))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn describe_status(&self, vi: ViObject, status: ViStatus) -> String {
        let mut data = [0 as c_char; 512];
        let ret = unsafe { self.api.viStatusDesc(vi, status, data.as_mut_ptr()) };
        if ret < 0 {
            return format!("Unknown status {:#x}", status);
        }
        from_buffer(&data)
    }

    fn check(&self, vi: ViObject, status: ViStatus) -> TransportResult<ViStatus> {
        if status >= 0 {
            return Ok(status);
        }
        if status == VI_ERROR_TMO {
            return Err(TransportError::Timeout);
        }
        Err(TransportError::Visa {
            code: status,
            description: self.describe_status(vi, status),
        })
    }

    pub fn find_resources(&self, expr: &str) -> TransportResult<Vec<String>> {
        let cexpr = c_string(expr)?;
        let mut find_list: ViFindList = 0;
        let mut count = 0_u32;
        let mut desc = [0 as c_char; VI_FIND_BUFLEN];
        let status = unsafe {
            self.api.viFindRsrc(
                self.rm,
                cexpr.as_ptr(),
                &mut find_list as *mut ViFindList,
                &mut count as *mut u32,
                desc.as_mut_ptr(),
            )
        };
        if status == VI_ERROR_RSRC_NFOUND {
            return Ok(Vec::new());
        }
        self.check(self.rm, status)?;
        let mut ret = Vec::with_capacity(count as usize);
        ret.push(from_buffer(&desc));
        for _ in 1..count {
            let status = unsafe { self.api.viFindNext(find_list, desc.as_mut_ptr()) };
            if let Err(err) = self.check(find_list, status) {
                let _ = self.close(find_list);
                return Err(err);
            }
            ret.push(from_buffer(&desc));
        }
        let _ = self.close(find_list);
        Ok(ret)
    }

    pub fn open(&self, addr: &str) -> TransportResult<ViSession> {
        let caddr = c_string(addr)?;
        let mut vi: ViSession = 0;
        let status = unsafe {
            self.api
                .viOpen(self.rm, caddr.as_ptr(), VI_NO_LOCK, OPEN_TIMEOUT_MS, &mut vi as *mut ViSession)
        };
        self.check(self.rm, status)?;
        Ok(vi)
    }

    pub fn close(&self, vi: ViObject) -> TransportResult<()> {
        let status = unsafe { self.api.viClose(vi) };
        self.check(self.rm, status).map(|_| ())
    }

    pub fn write(&self, vi: ViSession, data: &[u8]) -> TransportResult<()> {
        let mut offset = 0;
        while offset < data.len() {
            let chunk = &data[offset..];
            let mut written = 0_u32;
            let status = unsafe { self.api.viWrite(vi, chunk.as_ptr(), chunk.len() as u32, &mut written as *mut u32) };
            self.check(vi, status)?;
            if written == 0 {
                return Err(anyhow!("Instrument did not accept any data").into());
            }
            offset += written as usize;
        }
        Ok(())
    }

    /// Read until the instrument signals the end of the message.
    pub fn read(&self, vi: ViSession) -> TransportResult<Vec<u8>> {
        let mut ret = Vec::new();
        let mut buf = [0_u8; READ_CHUNK];
        loop {
            let mut count = 0_u32;
            let status = unsafe { self.api.viRead(vi, buf.as_mut_ptr(), buf.len() as u32, &mut count as *mut u32) };
            let status = self.check(vi, status)?;
            ret.extend_from_slice(&buf[..count as usize]);
            if status != VI_SUCCESS_MAX_CNT {
                return Ok(ret);
            }
        }
    }

    pub fn clear(&self, vi: ViSession) -> TransportResult<()> {
        let status = unsafe { self.api.viClear(vi) };
        self.check(vi, status).map(|_| ())
    }

    pub fn set_timeout(&self, vi: ViSession, timeout: Duration) -> TransportResult<()> {
        let millis = timeout.as_millis().min(u32::MAX as u128 - 1) as ViAttrState;
        let status = unsafe { self.api.viSetAttribute(vi, VI_ATTR_TMO_VALUE, millis) };
        self.check(vi, status).map(|_| ())
    }
}

impl Drop for Visa {
    fn drop(&mut self) {
        let status = unsafe { self.api.viClose(self.rm) };
        if status < 0 {
            log::error!("Error dropping resource manager: {}", self.describe_status(self.rm, status));
        }
    }
}
