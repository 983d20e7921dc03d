use stdlib::syscall_abi::STDOUT;
use stdlib::{SyscallPort, UserResult, Userland};

/// Stored in the image right after the entry point and read back at run time.
pub const GREETING: &[u8] = b"Hello from ring 3!\n";

pub fn main(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    let text = sys.image_data(0, GREETING.len())?;
    sys.write(STDOUT, &text)?;
    Ok(0)
}
