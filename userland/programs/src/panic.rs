use stdlib::{SyscallPort, UserResult, Userland};

const DEFAULT_MESSAGE: &str = "user-requested panic";

pub fn main(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    let args = sys.args()?;
    let message = match args.trim() {
        "" => DEFAULT_MESSAGE,
        message => message,
    };
    Err(sys.kernel_panic(message))
}
