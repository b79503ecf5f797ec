//! Outgoing mail through the locally installed desktop Outlook.
//!
//! The run's delivery channel is the user's own mail client, not a mail API:
//! the scheduled task runs on a workstation where Outlook is installed and
//! signed in, and the mail must leave from that mailbox. On Windows the
//! message is composed and sent through Outlook's COM automation surface
//! (`Outlook.Application`). On every other platform the public function is a
//! stub returning [`MailError::NotSupported`] so the rest of the crate
//! compiles and tests unchanged.

use std::path::PathBuf;
use tracing::info;

/// Error produced by a mail send.
#[derive(Debug, Clone)]
pub enum MailError {
    /// Outlook's COM surface rejected a call.
    Com { message: String },
    /// Desktop-client delivery is only available on Windows.
    NotSupported,
}

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Com { message } => write!(f, "Outlook automation failed: {message}"),
            Self::NotSupported => {
                write!(f, "desktop mail client delivery is only supported on Windows")
            }
        }
    }
}

impl std::error::Error for MailError {}

/// Compose the body naming the attached reports.
pub fn report_mail_body(report_names: &[&str]) -> String {
    format!("Attached are the two reports: {}.", report_names.join(" and "))
}

/// Send one email with the given attachments through desktop Outlook.
pub fn send_report_email(
    subject: &str,
    body: &str,
    recipient: &str,
    attachments: &[PathBuf],
) -> Result<(), MailError> {
    info!(
        "Preparing to send email with subject: {} ({} attachment(s))",
        subject,
        attachments.len()
    );
    platform::send(subject, body, recipient, attachments)?;
    info!("Email sent via Outlook");
    Ok(())
}

/// Windows implementation: late-bound COM automation of the running (or
/// freshly started) Outlook instance. Mirrors the interactive flow:
/// `CreateItem(olMailItem)` → set `To`/`Subject`/`Body` → `Attachments.Add`
/// per file → `Send`.
#[cfg(target_os = "windows")]
mod platform {
    use super::MailError;
    use std::path::PathBuf;
    use windows::core::{w, GUID, PCWSTR, VARIANT};
    use windows::Win32::System::Com::{
        CLSIDFromProgID, CoCreateInstance, CoInitializeEx, CoUninitialize, IDispatch,
        CLSCTX_LOCAL_SERVER, COINIT_APARTMENTTHREADED, DISPATCH_METHOD, DISPATCH_PROPERTYGET,
        DISPATCH_PROPERTYPUT, DISPPARAMS,
    };

    /// `olMailItem` in the Outlook object model.
    const OL_MAIL_ITEM: i32 = 0;
    /// DISPID_PROPERTYPUT: the named argument slot for property assignment.
    const DISPID_PROPERTYPUT: i32 = -3;
    const LOCALE_USER_DEFAULT: u32 = 0x0400;

    impl From<windows::core::Error> for MailError {
        fn from(e: windows::core::Error) -> Self {
            MailError::Com { message: e.message().to_string() }
        }
    }

    pub fn send(
        subject: &str,
        body: &str,
        recipient: &str,
        attachments: &[PathBuf],
    ) -> Result<(), MailError> {
        unsafe {
            CoInitializeEx(None, COINIT_APARTMENTTHREADED).ok()?;
        }
        let result = send_inner(subject, body, recipient, attachments);
        unsafe {
            CoUninitialize();
        }
        result
    }

    fn send_inner(
        subject: &str,
        body: &str,
        recipient: &str,
        attachments: &[PathBuf],
    ) -> Result<(), MailError> {
        let outlook: IDispatch = unsafe {
            let clsid = CLSIDFromProgID(w!("Outlook.Application"))?;
            CoCreateInstance(&clsid, None, CLSCTX_LOCAL_SERVER)?
        };

        let mail = invoke(&outlook, "CreateItem", DISPATCH_METHOD, &[VARIANT::from(OL_MAIL_ITEM)])?;
        let mail: IDispatch = IDispatch::try_from(&mail)?;

        put(&mail, "To", VARIANT::from(recipient))?;
        put(&mail, "Subject", VARIANT::from(subject))?;
        put(&mail, "Body", VARIANT::from(body))?;

        let attachments_obj = invoke(&mail, "Attachments", DISPATCH_PROPERTYGET, &[])?;
        let attachments_obj: IDispatch = IDispatch::try_from(&attachments_obj)?;
        for file in attachments {
            let path = file.to_string_lossy();
            invoke(
                &attachments_obj,
                "Add",
                DISPATCH_METHOD,
                &[VARIANT::from(path.as_ref())],
            )?;
        }

        invoke(&mail, "Send", DISPATCH_METHOD, &[])?;
        Ok(())
    }

    fn dispid(target: &IDispatch, name: &str) -> Result<i32, MailError> {
        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
        let name_ptr = PCWSTR(wide.as_ptr());
        let mut id = 0i32;
        unsafe {
            target.GetIDsOfNames(&GUID::zeroed(), &name_ptr, 1, LOCALE_USER_DEFAULT, &mut id)?;
        }
        Ok(id)
    }

    /// Late-bound `IDispatch::Invoke`. `args` in natural order; COM expects
    /// them reversed in `rgvarg`.
    fn invoke(
        target: &IDispatch,
        name: &str,
        flags: windows::Win32::System::Com::DISPATCH_FLAGS,
        args: &[VARIANT],
    ) -> Result<VARIANT, MailError> {
        let id = dispid(target, name)?;
        let mut reversed: Vec<VARIANT> = args.iter().rev().cloned().collect();
        let params = DISPPARAMS {
            rgvarg: reversed.as_mut_ptr(),
            rgdispidNamedArgs: std::ptr::null_mut(),
            cArgs: reversed.len() as u32,
            cNamedArgs: 0,
        };
        let mut result = VARIANT::default();
        unsafe {
            target.Invoke(
                id,
                &GUID::zeroed(),
                LOCALE_USER_DEFAULT,
                flags,
                &params,
                Some(&mut result),
                None,
                None,
            )?;
        }
        Ok(result)
    }

    fn put(target: &IDispatch, name: &str, value: VARIANT) -> Result<(), MailError> {
        let id = dispid(target, name)?;
        let mut args = [value];
        let mut named = [DISPID_PROPERTYPUT];
        let params = DISPPARAMS {
            rgvarg: args.as_mut_ptr(),
            rgdispidNamedArgs: named.as_mut_ptr(),
            cArgs: 1,
            cNamedArgs: 1,
        };
        unsafe {
            target.Invoke(
                id,
                &GUID::zeroed(),
                LOCALE_USER_DEFAULT,
                DISPATCH_PROPERTYPUT,
                &params,
                None,
                None,
                None,
            )?;
        }
        Ok(())
    }
}

#[cfg(not(target_os = "windows"))]
mod platform {
    use super::MailError;
    use std::path::PathBuf;

    pub fn send(
        _subject: &str,
        _body: &str,
        _recipient: &str,
        _attachments: &[PathBuf],
    ) -> Result<(), MailError> {
        Err(MailError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_names_both_reports() {
        let body = report_mail_body(&["מזנון", "קופות"]);
        assert_eq!(body, "Attached are the two reports: מזנון and קופות.");
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn non_windows_send_is_not_supported() {
        let err = send_report_email("s", "b", "someone@example.com", &[]).unwrap_err();
        assert!(matches!(err, MailError::NotSupported));
        assert!(err.to_string().contains("only supported on Windows"));
    }
}
