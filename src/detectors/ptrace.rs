//! Anti-Debug Guard.
//!
//! Unlike the probes, the guard does not feed the orchestrator. It runs
//! once at startup and acts on its own finding:
//!
//! 1. **Trace-state check**: ask the kernel whether this process is being
//!    traced. If it is, the compromise is already live and the process
//!    exits on the spot (or, in [`TerminationMode::Report`], the caller is
//!    told and decides).
//! 2. **Trace denial**: ask the kernel to refuse future tracer attaches.
//!    The call is looked up by symbol name at runtime, so no direct call
//!    site to it appears in the binary. Calling it with no tracer present
//!    is a no-op.
//!
//! # Platform Mechanisms
//!
//! | | trace state | denial |
//! |---|---|---|
//! | Darwin | `sysctl(KERN_PROC_PID)`, `P_TRACED` in `p_flag` | `ptrace(PT_DENY_ATTACH)` |
//! | Linux/Android | `TracerPid` in `/proc/self/status` | `prctl(PR_SET_DUMPABLE, 0)` |

use tracing::{error, info, warn};

use crate::error::ProbeError;

/// Exit status used when a tracer is found.
pub const TRACED_EXIT_CODE: i32 = 0;

/// Answers "is this process being traced right now?".
pub trait TraceState: Send + Sync {
    fn is_traced(&self) -> Result<bool, ProbeError>;
}

/// Asks the kernel to refuse tracer attaches.
pub trait TraceDenial: Send + Sync {
    fn deny_attach(&self) -> Result<(), ProbeError>;
}

/// Trace state as reported by the kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelTraceState;

impl TraceState for KernelTraceState {
    fn is_traced(&self) -> Result<bool, ProbeError> {
        kernel_is_traced()
    }
}

// <sys/proc.h>
const P_TRACED: i32 = 0x0000_0800;
// kinfo_proc is large and not bound by libc. Only p_flag is read: in the
// leading extern_proc it follows the 16-byte p_un union and the p_vmspace
// and p_sigacts pointers, on arm64 and x86_64 alike.
#[cfg_attr(not(any(target_os = "ios", target_os = "macos")), allow(dead_code))]
const KINFO_PROC_SIZE: usize = 648;
const P_FLAG_OFFSET: usize = 32;

/// `P_TRACED` from a raw `kinfo_proc`, or `None` if the buffer stops short
/// of `p_flag`.
#[cfg_attr(not(any(target_os = "ios", target_os = "macos")), allow(dead_code))]
fn traced_from_kinfo(kinfo: &[u8]) -> Option<bool> {
    let raw: [u8; 4] = kinfo.get(P_FLAG_OFFSET..P_FLAG_OFFSET + 4)?.try_into().ok()?;
    Some(i32::from_ne_bytes(raw) & P_TRACED != 0)
}

#[cfg(any(target_os = "ios", target_os = "macos"))]
fn kernel_is_traced() -> Result<bool, ProbeError> {
    let mut buf = [0u8; KINFO_PROC_SIZE];
    let mut size: libc::size_t = KINFO_PROC_SIZE;
    // SAFETY: getpid cannot fail.
    let pid = unsafe { libc::getpid() };
    let mut mib: [libc::c_int; 4] = [libc::CTL_KERN, libc::KERN_PROC, libc::KERN_PROC_PID, pid];

    // SAFETY: the kernel writes at most `size` bytes into `buf`.
    let rc = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            mib.len() as libc::c_uint,
            buf.as_mut_ptr().cast::<libc::c_void>(),
            &mut size,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 {
        return Err(ProbeError::kernel("sysctl(KERN_PROC_PID)"));
    }
    traced_from_kinfo(&buf[..size.min(KINFO_PROC_SIZE)]).ok_or_else(|| ProbeError::Kernel {
        query: "sysctl(KERN_PROC_PID)",
        source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short kinfo_proc"),
    })
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn kernel_is_traced() -> Result<bool, ProbeError> {
    let status = std::fs::read_to_string("/proc/self/status")
        .map_err(|err| ProbeError::io("read /proc/self/status", err))?;
    Ok(tracer_pid(&status).is_some_and(|pid| pid != 0))
}

#[cfg(not(any(
    target_os = "ios",
    target_os = "macos",
    target_os = "linux",
    target_os = "android"
)))]
fn kernel_is_traced() -> Result<bool, ProbeError> {
    Err(ProbeError::Unsupported)
}

/// `TracerPid:` field of a `/proc/<pid>/status` listing.
#[cfg_attr(not(any(target_os = "linux", target_os = "android")), allow(dead_code))]
fn tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// Trace denial through a symbol resolved once at startup.
pub struct DynamicTraceDenial {
    entry: DenialEntry,
}

#[cfg(any(target_os = "ios", target_os = "macos"))]
type DenialEntry =
    unsafe extern "C" fn(libc::c_int, libc::pid_t, *mut libc::c_char, libc::c_int) -> libc::c_int;

#[cfg(not(any(target_os = "ios", target_os = "macos")))]
type DenialEntry = unsafe extern "C" fn(libc::c_int, ...) -> libc::c_int;

#[cfg(any(target_os = "ios", target_os = "macos"))]
const DENIAL_SYMBOL: (&str, &[u8]) = ("ptrace", b"ptrace\0");

#[cfg(not(any(target_os = "ios", target_os = "macos")))]
const DENIAL_SYMBOL: (&str, &[u8]) = ("prctl", b"prctl\0");

impl DynamicTraceDenial {
    /// Look the denial call up in the already-loaded images.
    pub fn resolve() -> Result<Self, ProbeError> {
        let (name, symbol) = DENIAL_SYMBOL;
        // SAFETY: dlopen(NULL) returns the main program handle; the symbol
        // name is NUL-terminated. A non-null address for this name is the
        // libc function with the signature declared in `DenialEntry`.
        unsafe {
            let handle = libc::dlopen(std::ptr::null(), libc::RTLD_NOW);
            if handle.is_null() {
                return Err(ProbeError::SymbolUnresolved(name));
            }
            let address = libc::dlsym(handle, symbol.as_ptr().cast());
            if address.is_null() {
                return Err(ProbeError::SymbolUnresolved(name));
            }
            Ok(Self {
                entry: std::mem::transmute::<*mut libc::c_void, DenialEntry>(address),
            })
        }
    }
}

impl TraceDenial for DynamicTraceDenial {
    #[cfg(any(target_os = "ios", target_os = "macos"))]
    fn deny_attach(&self) -> Result<(), ProbeError> {
        const PT_DENY_ATTACH: libc::c_int = 31;
        // SAFETY: `entry` is ptrace; PT_DENY_ATTACH ignores the other arguments.
        let rc = unsafe { (self.entry)(PT_DENY_ATTACH, 0, std::ptr::null_mut(), 0) };
        if rc == -1 {
            return Err(ProbeError::kernel("ptrace(PT_DENY_ATTACH)"));
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "ios", target_os = "macos")))]
    fn deny_attach(&self) -> Result<(), ProbeError> {
        const PR_SET_DUMPABLE: libc::c_int = 4;
        // SAFETY: `entry` is prctl; PR_SET_DUMPABLE takes one integer argument.
        let rc = unsafe { (self.entry)(PR_SET_DUMPABLE, 0 as libc::c_ulong) };
        if rc == -1 {
            return Err(ProbeError::kernel("prctl(PR_SET_DUMPABLE)"));
        }
        Ok(())
    }
}

/// Stand-in for builds and tests that must stay attachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTraceDenial;

impl TraceDenial for NoopTraceDenial {
    fn deny_attach(&self) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// What the guard does when it finds a tracer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationMode {
    /// Exit immediately, skipping all cleanup.
    Immediate,
    /// Return [`GuardOutcome::Traced`] and let the caller shut down.
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// No tracer; denial requested.
    Clear,
    /// A tracer is attached (only returned in [`TerminationMode::Report`]).
    Traced,
}

pub struct AntiDebugGuard {
    state: Box<dyn TraceState>,
    denial: Box<dyn TraceDenial>,
    mode: TerminationMode,
}

impl AntiDebugGuard {
    pub fn new(
        state: impl TraceState + 'static,
        denial: impl TraceDenial + 'static,
        mode: TerminationMode,
    ) -> Self {
        Self {
            state: Box::new(state),
            denial: Box::new(denial),
            mode,
        }
    }

    /// Kernel trace state and the dynamically resolved denial call. Falls
    /// back to a no-op denial when the symbol cannot be resolved.
    pub fn system(mode: TerminationMode) -> Self {
        match DynamicTraceDenial::resolve() {
            Ok(denial) => Self::new(KernelTraceState, denial, mode),
            Err(err) => {
                warn!(error = %err, "trace denial unavailable");
                Self::new(KernelTraceState, NoopTraceDenial, mode)
            }
        }
    }

    /// Run both actions.
    pub fn engage(&self) -> GuardOutcome {
        let traced = match self.state.is_traced() {
            Ok(traced) => traced,
            Err(ProbeError::Unsupported) => false,
            Err(err) => {
                warn!(error = %err, "trace state unavailable, assuming untraced");
                false
            }
        };

        if traced {
            error!(target: "shield::security", mode = ?self.mode, "process is being traced");
            if self.mode == TerminationMode::Immediate {
                std::process::exit(TRACED_EXIT_CODE);
            }
            return GuardOutcome::Traced;
        }

        match self.denial.deny_attach() {
            Ok(()) => info!("tracer attach denied for the rest of the process lifetime"),
            Err(err) => warn!(error = %err, "trace denial failed"),
        }
        GuardOutcome::Clear
    }
}
