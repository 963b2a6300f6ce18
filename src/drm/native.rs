//! DRMAA 1.0 binding: the production [`DrmSession`].
//!
//! Talks to whatever resource manager the linked `libdrmaa` fronts (Grid
//! Engine, PBS/Torque, Slurm's compatibility library, ...). The DRMAA
//! session is process-global, so the wrapper carries no state of its own;
//! every call funnels its error diagnosis buffer into [`DrmError`].

#![allow(non_camel_case_types)]

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_long};

use crate::drm::session::{DrmError, DrmExitStatus, DrmSession, JobTemplate};
use crate::scheduler::job::JobStatus;

#[repr(C)]
struct drmaa_job_template_t {
    _private: [u8; 0],
}

#[repr(C)]
struct drmaa_attr_values_t {
    _private: [u8; 0],
}

#[link(name = "drmaa")]
extern "C" {
    fn drmaa_init(contact: *const c_char, error: *mut c_char, error_len: usize) -> c_int;
    fn drmaa_exit(error: *mut c_char, error_len: usize) -> c_int;
    fn drmaa_get_DRM_system(
        drm_system: *mut c_char,
        drm_system_len: usize,
        error: *mut c_char,
        error_len: usize,
    ) -> c_int;
    fn drmaa_allocate_job_template(
        jt: *mut *mut drmaa_job_template_t,
        error: *mut c_char,
        error_len: usize,
    ) -> c_int;
    fn drmaa_delete_job_template(
        jt: *mut drmaa_job_template_t,
        error: *mut c_char,
        error_len: usize,
    ) -> c_int;
    fn drmaa_set_attribute(
        jt: *mut drmaa_job_template_t,
        name: *const c_char,
        value: *const c_char,
        error: *mut c_char,
        error_len: usize,
    ) -> c_int;
    fn drmaa_set_vector_attribute(
        jt: *mut drmaa_job_template_t,
        name: *const c_char,
        values: *const *const c_char,
        error: *mut c_char,
        error_len: usize,
    ) -> c_int;
    fn drmaa_run_job(
        job_id: *mut c_char,
        job_id_len: usize,
        jt: *const drmaa_job_template_t,
        error: *mut c_char,
        error_len: usize,
    ) -> c_int;
    fn drmaa_job_ps(
        job_id: *const c_char,
        remote_ps: *mut c_int,
        error: *mut c_char,
        error_len: usize,
    ) -> c_int;
    fn drmaa_wait(
        job_id: *const c_char,
        job_id_out: *mut c_char,
        job_id_out_len: usize,
        stat: *mut c_int,
        timeout: c_long,
        rusage: *mut *mut drmaa_attr_values_t,
        error: *mut c_char,
        error_len: usize,
    ) -> c_int;
    fn drmaa_wifexited(exited: *mut c_int, stat: c_int, error: *mut c_char, error_len: usize)
        -> c_int;
    fn drmaa_wexitstatus(
        exit_status: *mut c_int,
        stat: c_int,
        error: *mut c_char,
        error_len: usize,
    ) -> c_int;
    fn drmaa_wifsignaled(
        signaled: *mut c_int,
        stat: c_int,
        error: *mut c_char,
        error_len: usize,
    ) -> c_int;
    fn drmaa_wtermsig(
        signal: *mut c_char,
        signal_len: usize,
        stat: c_int,
        error: *mut c_char,
        error_len: usize,
    ) -> c_int;
    fn drmaa_wifaborted(
        aborted: *mut c_int,
        stat: c_int,
        error: *mut c_char,
        error_len: usize,
    ) -> c_int;
    fn drmaa_get_next_attr_value(
        values: *mut drmaa_attr_values_t,
        value: *mut c_char,
        value_len: usize,
    ) -> c_int;
    fn drmaa_release_attr_values(values: *mut drmaa_attr_values_t);
    fn drmaa_control(
        job_id: *const c_char,
        action: c_int,
        error: *mut c_char,
        error_len: usize,
    ) -> c_int;
    fn drmaa_strerror(errnum: c_int) -> *const c_char;
}

const DRMAA_ERRNO_SUCCESS: c_int = 0;
const DRMAA_ERRNO_INVALID_JOB: c_int = 18;

const DRMAA_TIMEOUT_WAIT_FOREVER: c_long = -1;
const DRMAA_CONTROL_TERMINATE: c_int = 4;

const DRMAA_PS_QUEUED_ACTIVE: c_int = 0x10;
const DRMAA_PS_SYSTEM_ON_HOLD: c_int = 0x11;
const DRMAA_PS_USER_ON_HOLD: c_int = 0x12;
const DRMAA_PS_USER_SYSTEM_ON_HOLD: c_int = 0x13;
const DRMAA_PS_RUNNING: c_int = 0x20;
const DRMAA_PS_SYSTEM_SUSPENDED: c_int = 0x21;
const DRMAA_PS_USER_SUSPENDED: c_int = 0x22;
const DRMAA_PS_DONE: c_int = 0x30;
const DRMAA_PS_FAILED: c_int = 0x40;

const ERROR_BUFFER_LEN: usize = 1024;
const VALUE_BUFFER_LEN: usize = 1024;

const ATTR_REMOTE_COMMAND: &str = "drmaa_remote_command";
const ATTR_ARGV: &str = "drmaa_v_argv";
const ATTR_OUTPUT_PATH: &str = "drmaa_output_path";
const ATTR_ERROR_PATH: &str = "drmaa_error_path";
const ATTR_INPUT_PATH: &str = "drmaa_input_path";
const ATTR_JOIN_FILES: &str = "drmaa_join_files";
const ATTR_WORKING_DIRECTORY: &str = "drmaa_wd";
const ATTR_ENV: &str = "drmaa_v_env";
const ATTR_NATIVE_SPECIFICATION: &str = "drmaa_native_specification";

struct ErrorBuffer([u8; ERROR_BUFFER_LEN]);

impl ErrorBuffer {
    fn new() -> Self {
        Self([0; ERROR_BUFFER_LEN])
    }

    fn as_mut_ptr(&mut self) -> *mut c_char {
        self.0.as_mut_ptr() as *mut c_char
    }

    fn diagnosis(&self, code: c_int) -> String {
        let text = buffer_to_string(&self.0);
        if !text.is_empty() {
            return text;
        }
        // Fall back to the binding's static message table.
        unsafe {
            let msg = drmaa_strerror(code);
            if msg.is_null() {
                format!("error code {code}")
            } else {
                CStr::from_ptr(msg).to_string_lossy().into_owned()
            }
        }
    }
}

fn buffer_to_string(buffer: &[u8]) -> String {
    let end = buffer.iter().position(|b| *b == 0).unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..end]).into_owned()
}

fn check(code: c_int, error: &ErrorBuffer) -> Result<(), DrmError> {
    match code {
        DRMAA_ERRNO_SUCCESS => Ok(()),
        DRMAA_ERRNO_INVALID_JOB => Err(DrmError::InvalidJob(error.diagnosis(code))),
        _ => Err(DrmError::Api {
            code,
            message: error.diagnosis(code),
        }),
    }
}

fn c_string(value: &str) -> Result<CString, DrmError> {
    CString::new(value).map_err(|_| DrmError::Api {
        code: -1,
        message: format!("embedded NUL in value '{value}'"),
    })
}

/// Owned manager job template, freed on drop.
struct Template(*mut drmaa_job_template_t);

impl Template {
    fn allocate() -> Result<Self, DrmError> {
        let mut error = ErrorBuffer::new();
        let mut jt: *mut drmaa_job_template_t = std::ptr::null_mut();
        let code =
            unsafe { drmaa_allocate_job_template(&mut jt, error.as_mut_ptr(), ERROR_BUFFER_LEN) };
        check(code, &error)?;
        Ok(Self(jt))
    }

    fn set(&mut self, name: &str, value: &str) -> Result<(), DrmError> {
        let name = c_string(name)?;
        let value = c_string(value)?;
        let mut error = ErrorBuffer::new();
        let code = unsafe {
            drmaa_set_attribute(
                self.0,
                name.as_ptr(),
                value.as_ptr(),
                error.as_mut_ptr(),
                ERROR_BUFFER_LEN,
            )
        };
        check(code, &error)
    }

    fn set_vector(&mut self, name: &str, values: &[String]) -> Result<(), DrmError> {
        let name = c_string(name)?;
        let owned: Vec<CString> = values
            .iter()
            .map(|v| c_string(v))
            .collect::<Result<_, _>>()?;
        let mut pointers: Vec<*const c_char> = owned.iter().map(|v| v.as_ptr()).collect();
        pointers.push(std::ptr::null());

        let mut error = ErrorBuffer::new();
        let code = unsafe {
            drmaa_set_vector_attribute(
                self.0,
                name.as_ptr(),
                pointers.as_ptr(),
                error.as_mut_ptr(),
                ERROR_BUFFER_LEN,
            )
        };
        check(code, &error)
    }
}

impl Drop for Template {
    fn drop(&mut self) {
        let mut error = ErrorBuffer::new();
        unsafe {
            drmaa_delete_job_template(self.0, error.as_mut_ptr(), ERROR_BUFFER_LEN);
        }
    }
}

/// The production session. DRMAA keeps session state process-globally, so
/// this type is just the call surface.
pub struct NativeDrmSession;

impl NativeDrmSession {
    pub fn new() -> Self {
        Self
    }

    fn decode_wait(stat: c_int, resource_usage: Vec<String>) -> DrmExitStatus {
        let mut error = ErrorBuffer::new();

        let mut exited: c_int = 0;
        unsafe {
            drmaa_wifexited(&mut exited, stat, error.as_mut_ptr(), ERROR_BUFFER_LEN);
        }

        let exit_code = if exited != 0 {
            let mut code: c_int = 0;
            unsafe {
                drmaa_wexitstatus(&mut code, stat, error.as_mut_ptr(), ERROR_BUFFER_LEN);
            }
            Some(code)
        } else {
            None
        };

        let mut signaled: c_int = 0;
        unsafe {
            drmaa_wifsignaled(&mut signaled, stat, error.as_mut_ptr(), ERROR_BUFFER_LEN);
        }

        let term_signal = if signaled != 0 {
            let mut buffer = [0u8; VALUE_BUFFER_LEN];
            unsafe {
                drmaa_wtermsig(
                    buffer.as_mut_ptr() as *mut c_char,
                    VALUE_BUFFER_LEN,
                    stat,
                    error.as_mut_ptr(),
                    ERROR_BUFFER_LEN,
                );
            }
            Some(buffer_to_string(&buffer))
        } else {
            None
        };

        let mut aborted: c_int = 0;
        unsafe {
            drmaa_wifaborted(&mut aborted, stat, error.as_mut_ptr(), ERROR_BUFFER_LEN);
        }

        DrmExitStatus {
            exited: exited != 0,
            exit_code,
            signaled: signaled != 0,
            term_signal,
            aborted: aborted != 0,
            resource_usage,
        }
    }

    fn drain_attr_values(values: *mut drmaa_attr_values_t) -> Vec<String> {
        let mut collected = Vec::new();
        if values.is_null() {
            return collected;
        }
        loop {
            let mut buffer = [0u8; VALUE_BUFFER_LEN];
            let code = unsafe {
                drmaa_get_next_attr_value(
                    values,
                    buffer.as_mut_ptr() as *mut c_char,
                    VALUE_BUFFER_LEN,
                )
            };
            if code != DRMAA_ERRNO_SUCCESS {
                break;
            }
            collected.push(buffer_to_string(&buffer));
        }
        unsafe {
            drmaa_release_attr_values(values);
        }
        collected
    }
}

impl Default for NativeDrmSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DrmSession for NativeDrmSession {
    fn init(&self) -> Result<(), DrmError> {
        let mut error = ErrorBuffer::new();
        let code =
            unsafe { drmaa_init(std::ptr::null(), error.as_mut_ptr(), ERROR_BUFFER_LEN) };
        check(code, &error)
    }

    fn exit(&self) -> Result<(), DrmError> {
        let mut error = ErrorBuffer::new();
        let code = unsafe { drmaa_exit(error.as_mut_ptr(), ERROR_BUFFER_LEN) };
        check(code, &error)
    }

    fn drm_system(&self) -> Result<String, DrmError> {
        let mut buffer = [0u8; VALUE_BUFFER_LEN];
        let mut error = ErrorBuffer::new();
        let code = unsafe {
            drmaa_get_DRM_system(
                buffer.as_mut_ptr() as *mut c_char,
                VALUE_BUFFER_LEN,
                error.as_mut_ptr(),
                ERROR_BUFFER_LEN,
            )
        };
        check(code, &error)?;
        Ok(buffer_to_string(&buffer))
    }

    fn run_job(&self, template: &JobTemplate) -> Result<String, DrmError> {
        let mut jt = Template::allocate()?;

        let Some((program, args)) = template.command.split_first() else {
            return Err(DrmError::Api {
                code: -1,
                message: "empty command".to_string(),
            });
        };
        jt.set(ATTR_REMOTE_COMMAND, program)?;
        if !args.is_empty() {
            jt.set_vector(ATTR_ARGV, args)?;
        }

        // Stdio paths carry a leading colon: DRMAA's [host]:path syntax
        // with the host part left empty.
        if let Some(path) = &template.stdout_path {
            jt.set(ATTR_OUTPUT_PATH, &format!(":{}", path.display()))?;
        }
        if template.join_stderrout {
            jt.set(ATTR_JOIN_FILES, "y")?;
        } else if let Some(path) = &template.stderr_path {
            jt.set(ATTR_ERROR_PATH, &format!(":{}", path.display()))?;
        }
        if let Some(path) = &template.stdin_path {
            jt.set(ATTR_INPUT_PATH, &format!(":{}", path.display()))?;
        }
        if let Some(dir) = &template.working_directory {
            jt.set(ATTR_WORKING_DIRECTORY, &dir.to_string_lossy())?;
        }
        if !template.env.is_empty() {
            let pairs: Vec<String> = template
                .env
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            jt.set_vector(ATTR_ENV, &pairs)?;
        }

        let mut native_options = Vec::new();
        if let Some(queue) = &template.queue {
            native_options.push(format!("-q {queue}"));
        }
        if let Some(spec) = &template.native_specification {
            native_options.push(spec.clone());
        }
        if !native_options.is_empty() {
            jt.set(ATTR_NATIVE_SPECIFICATION, &native_options.join(" "))?;
        }

        let mut job_id = [0u8; VALUE_BUFFER_LEN];
        let mut error = ErrorBuffer::new();
        let code = unsafe {
            drmaa_run_job(
                job_id.as_mut_ptr() as *mut c_char,
                VALUE_BUFFER_LEN,
                jt.0,
                error.as_mut_ptr(),
                ERROR_BUFFER_LEN,
            )
        };
        check(code, &error)?;
        Ok(buffer_to_string(&job_id))
    }

    fn job_state(&self, job_id: &str) -> Result<JobStatus, DrmError> {
        let id = c_string(job_id)?;
        let mut remote_ps: c_int = 0;
        let mut error = ErrorBuffer::new();
        let code = unsafe {
            drmaa_job_ps(
                id.as_ptr(),
                &mut remote_ps,
                error.as_mut_ptr(),
                ERROR_BUFFER_LEN,
            )
        };
        check(code, &error)?;

        Ok(match remote_ps {
            DRMAA_PS_QUEUED_ACTIVE => JobStatus::QueuedActive,
            DRMAA_PS_SYSTEM_ON_HOLD => JobStatus::SystemOnHold,
            DRMAA_PS_USER_ON_HOLD => JobStatus::UserOnHold,
            DRMAA_PS_USER_SYSTEM_ON_HOLD => JobStatus::UserSystemOnHold,
            DRMAA_PS_RUNNING => JobStatus::Running,
            DRMAA_PS_SYSTEM_SUSPENDED => JobStatus::SystemSuspended,
            DRMAA_PS_USER_SUSPENDED => JobStatus::UserSuspended,
            DRMAA_PS_DONE => JobStatus::Done,
            DRMAA_PS_FAILED => JobStatus::Failed,
            _ => JobStatus::Undetermined,
        })
    }

    fn wait_job(&self, job_id: &str) -> Result<DrmExitStatus, DrmError> {
        let id = c_string(job_id)?;
        let mut job_id_out = [0u8; VALUE_BUFFER_LEN];
        let mut stat: c_int = 0;
        let mut rusage: *mut drmaa_attr_values_t = std::ptr::null_mut();
        let mut error = ErrorBuffer::new();

        let code = unsafe {
            drmaa_wait(
                id.as_ptr(),
                job_id_out.as_mut_ptr() as *mut c_char,
                VALUE_BUFFER_LEN,
                &mut stat,
                DRMAA_TIMEOUT_WAIT_FOREVER,
                &mut rusage,
                error.as_mut_ptr(),
                ERROR_BUFFER_LEN,
            )
        };
        check(code, &error)?;

        let resource_usage = Self::drain_attr_values(rusage);
        Ok(Self::decode_wait(stat, resource_usage))
    }

    fn kill_job(&self, job_id: &str) -> Result<(), DrmError> {
        let id = c_string(job_id)?;
        let mut error = ErrorBuffer::new();
        let code = unsafe {
            drmaa_control(
                id.as_ptr(),
                DRMAA_CONTROL_TERMINATE,
                error.as_mut_ptr(),
                ERROR_BUFFER_LEN,
            )
        };
        check(code, &error)
    }
}
