//! Demuxer and muxer lookup.

use std::ffi::{CStr, CString, c_char};
use std::ptr;

use ffmpeg_next::ffi;

use crate::error::{Error, Result};

fn cstring(value: &str) -> Result<CString> {
    CString::new(value).map_err(|e| Error::InvalidArgument(format!("{:?}: {}", value, e)))
}

fn opt_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// A registered demuxer. Demuxer descriptors are static and never freed.
#[derive(Clone, Copy)]
pub struct InputFormat {
    ptr: *const ffi::AVInputFormat,
}

unsafe impl Send for InputFormat {}

impl InputFormat {
    /// Resolve input format by name (e.g. "mov", "mpegts") via av_find_input_format.
    pub fn find(name: &str) -> Result<Self> {
        let cname = cstring(name)?;
        let ptr = unsafe { ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            return Err(Error::InputFormatNotFound(name.to_string()));
        }
        Ok(Self { ptr })
    }

    pub(crate) fn as_ptr(&self) -> *const ffi::AVInputFormat {
        self.ptr
    }

    pub fn name(&self) -> &str {
        opt_str(unsafe { (*self.ptr).name }).unwrap_or_default()
    }

    pub fn long_name(&self) -> Option<&str> {
        opt_str(unsafe { (*self.ptr).long_name })
    }
}

impl std::fmt::Debug for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputFormat").field("name", &self.name()).finish()
    }
}

/// A registered muxer.
#[derive(Clone, Copy)]
pub struct OutputFormat {
    ptr: *const ffi::AVOutputFormat,
}

unsafe impl Send for OutputFormat {}

impl OutputFormat {
    /// Resolves a muxer by, in order, short name, file name (extension), MIME type.
    /// Empty strings are skipped.
    pub fn find(name: &str, filename: &str, mime_type: &str) -> Result<Self> {
        if !name.is_empty() {
            if let Some(format) = Self::guess(Some(name), None, None)? {
                return Ok(format);
            }
            log::debug!("no muxer named {:?}", name);
        }
        if !filename.is_empty() {
            if let Some(format) = Self::guess(None, Some(filename), None)? {
                return Ok(format);
            }
            log::debug!("no muxer for file name {:?}", filename);
        }
        if !mime_type.is_empty() {
            if let Some(format) = Self::guess(None, None, Some(mime_type))? {
                return Ok(format);
            }
            log::debug!("no muxer for mime type {:?}", mime_type);
        }
        Err(Error::FormatResolution)
    }

    pub fn by_name(name: &str) -> Result<Self> {
        Self::find(name, "", "")
    }

    pub fn by_filename(filename: &str) -> Result<Self> {
        Self::find("", filename, "")
    }

    pub fn by_mime_type(mime_type: &str) -> Result<Self> {
        Self::find("", "", mime_type)
    }

    fn guess(
        name: Option<&str>,
        filename: Option<&str>,
        mime_type: Option<&str>,
    ) -> Result<Option<Self>> {
        let name = name.map(cstring).transpose()?;
        let filename = filename.map(cstring).transpose()?;
        let mime_type = mime_type.map(cstring).transpose()?;
        let as_ptr = |s: &Option<CString>| s.as_ref().map_or(ptr::null(), |s| s.as_ptr());

        let ptr = unsafe {
            ffi::av_guess_format(as_ptr(&name), as_ptr(&filename), as_ptr(&mime_type))
        };
        if ptr.is_null() {
            Ok(None)
        } else {
            Ok(Some(Self { ptr }))
        }
    }

    pub(crate) fn from_ptr(ptr: *const ffi::AVOutputFormat) -> Option<Self> {
        if ptr.is_null() { None } else { Some(Self { ptr }) }
    }

    pub(crate) fn as_ptr(&self) -> *const ffi::AVOutputFormat {
        self.ptr
    }

    pub fn name(&self) -> &str {
        opt_str(unsafe { (*self.ptr).name }).unwrap_or_default()
    }

    pub fn long_name(&self) -> Option<&str> {
        opt_str(unsafe { (*self.ptr).long_name })
    }

    pub fn mime_type(&self) -> Option<&str> {
        opt_str(unsafe { (*self.ptr).mime_type })
    }

    /// Comma separated list of file extensions, e.g. "mp4".
    pub fn extensions(&self) -> Vec<&str> {
        opt_str(unsafe { (*self.ptr).extensions })
            .map(|s| s.split(',').filter(|e| !e.is_empty()).collect())
            .unwrap_or_default()
    }

    fn flags(&self) -> i32 {
        unsafe { (*self.ptr).flags }
    }

    /// The muxer wants codec parameter sets in the container header.
    pub fn is_global_header(&self) -> bool {
        self.flags() & ffi::AVFMT_GLOBALHEADER as i32 != 0
    }

    /// The muxer does its own I/O and needs no file opened for it.
    pub fn is_no_file(&self) -> bool {
        self.flags() & ffi::AVFMT_NOFILE as i32 != 0
    }
}

impl std::fmt::Debug for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputFormat")
            .field("name", &self.name())
            .field("mime_type", &self.mime_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() {
        crate::init().unwrap();
    }

    #[test]
    fn test_output_format_by_name() {
        setup();
        let format = OutputFormat::by_name("mp4").unwrap();
        assert_eq!(format.name(), "mp4");
        assert!(format.is_global_header());
        assert!(format.extensions().contains(&"mp4"));
    }

    #[test]
    fn test_output_format_by_filename() {
        setup();
        let format = OutputFormat::by_filename("clip.ts").unwrap();
        assert_eq!(format.name(), "mpegts");
        assert!(!format.is_global_header());
    }

    #[test]
    fn test_output_format_by_mime_type() {
        setup();
        let format = OutputFormat::by_mime_type("video/mp4").unwrap();
        assert_eq!(format.mime_type(), Some("video/mp4"));
    }

    #[test]
    fn test_name_wins_over_filename() {
        setup();
        let format = OutputFormat::find("mpegts", "clip.mp4", "").unwrap();
        assert_eq!(format.name(), "mpegts");
    }

    #[test]
    fn test_unresolvable_output_format() {
        setup();
        let cases = [
            ("", "", ""),
            ("", "", "wrong/mime"),
            ("no-such-muxer", "", ""),
            ("", "file.unknownext", ""),
            ("no-such-muxer", "file.unknownext", "wrong/mime"),
        ];
        for (name, filename, mime) in cases {
            let err = OutputFormat::find(name, filename, mime).unwrap_err();
            assert!(
                matches!(err, Error::FormatResolution),
                "{:?} resolved unexpectedly",
                (name, filename, mime)
            );
        }
    }

    #[test]
    fn test_input_format_lookup() {
        setup();
        assert_eq!(InputFormat::find("mpegts").unwrap().name(), "mpegts");
        assert!(matches!(
            InputFormat::find("definitely-not-a-demuxer"),
            Err(Error::InputFormatNotFound(_))
        ));
    }
}
