pub mod bytecode;
pub mod mocked_host;
pub mod tester;

pub use bytecode::{Bytecode, CallInstruction};
pub use mocked_host::MockedHost;
pub use tester::EvmTester;
