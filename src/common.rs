use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use strum_macros::Display;

/// EVM fork revision, oldest to newest.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord)]
pub enum Revision {
    /// The Frontier revision.
    /// The one Ethereum launched with.
    Frontier = 0,

    /// [The Homestead revision.](https://eips.ethereum.org/EIPS/eip-606)
    Homestead = 1,

    /// [The Tangerine Whistle revision.](https://eips.ethereum.org/EIPS/eip-608)
    Tangerine = 2,

    /// [The Spurious Dragon revision.](https://eips.ethereum.org/EIPS/eip-607)
    Spurious = 3,

    /// [The Byzantium revision.](https://eips.ethereum.org/EIPS/eip-609)
    Byzantium = 4,

    /// [The Constantinople revision.](https://eips.ethereum.org/EIPS/eip-1013)
    Constantinople = 5,

    /// [The Petersburg revision.](https://eips.ethereum.org/EIPS/eip-1716)
    Petersburg = 6,

    /// [The Istanbul revision.](https://eips.ethereum.org/EIPS/eip-1679)
    Istanbul = 7,

    /// [The Berlin revision.](https://github.com/ethereum/eth1.0-specs/blob/master/network-upgrades/mainnet-upgrades/berlin.md)
    Berlin = 8,

    /// [The London revision.](https://github.com/ethereum/eth1.0-specs/blob/master/network-upgrades/mainnet-upgrades/london.md)
    London = 9,

    /// The Shanghai revision. Adds PUSH0; otherwise shares London's gas table.
    Shanghai = 10,
}

impl Revision {
    pub fn iter() -> impl Iterator<Item = Self> {
        [
            Self::Frontier,
            Self::Homestead,
            Self::Tangerine,
            Self::Spurious,
            Self::Byzantium,
            Self::Constantinople,
            Self::Petersburg,
            Self::Istanbul,
            Self::Berlin,
            Self::London,
            Self::Shanghai,
        ]
        .iter()
        .copied()
    }

    pub const fn len() -> usize {
        Self::Shanghai as usize + 1
    }

    pub const fn latest() -> Self {
        Self::Shanghai
    }
}

/// Closed taxonomy of EVM execution outcomes. Returned as a value from every
/// fallible interpreter/instruction function; never unwinds.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum StatusCode {
    /// Execution finished with success.
    #[strum(serialize = "success")]
    Success,

    /// Generic execution failure.
    #[strum(serialize = "failure")]
    Failure,

    /// Execution terminated with REVERT opcode.
    ///
    /// In this case the amount of gas left MAY be non-zero and additional
    /// output data MAY be provided.
    #[strum(serialize = "revert")]
    Revert,

    /// The execution has run out of gas.
    #[strum(serialize = "out of gas")]
    OutOfGas,

    /// An addition/multiplication of gas values overflowed an integer.
    #[strum(serialize = "gas uint overflow")]
    GasUintOverflow,

    /// The designated INVALID instruction has been hit during execution.
    #[strum(serialize = "invalid instruction")]
    InvalidInstruction,

    /// An undefined instruction has been encountered.
    #[strum(serialize = "undefined instruction")]
    UndefinedInstruction,

    /// The execution has attempted to put more items on the EVM stack
    /// than the specified limit.
    #[strum(serialize = "stack overflow")]
    StackOverflow,

    /// Execution of an opcode has required more items on the EVM stack.
    #[strum(serialize = "stack underflow")]
    StackUnderflow,

    /// Execution has violated the jump destination restrictions.
    #[strum(serialize = "bad jump destination")]
    BadJumpDestination,

    /// Tried to read or write outside memory bounds.
    #[strum(serialize = "invalid memory access")]
    InvalidMemoryAccess,

    /// RETURNDATACOPY (or similar) read past the available return-data buffer.
    #[strum(serialize = "return data out of bounds")]
    ReturnDataOutOfBounds,

    /// Call depth has exceeded the limit (1024).
    #[strum(serialize = "call depth exceeded")]
    Depth,

    /// Tried to execute a state-mutating operation while in static-call mode.
    #[strum(serialize = "static mode violation")]
    WriteProtection,

    /// The caller does not have enough funds for value transfer.
    #[strum(serialize = "insufficient balance")]
    InsufficientBalance,

    /// Deployed code size exceeds the 24576-byte limit (EIP-170).
    #[strum(serialize = "max code size exceeded")]
    MaxCodeSizeExceeded,

    /// Init code size exceeds the limit (EIP-3860).
    #[strum(serialize = "max init code size exceeded")]
    MaxInitCodeSizeExceeded,

    /// A call to a precompiled or system contract has ended with a failure.
    #[strum(serialize = "precompile failure")]
    PrecompileFailure,

    /// Contract validation has failed (e.g. EVM 1.5 jump validity).
    #[strum(serialize = "contract validation failure")]
    ContractValidationFailure,

    /// An argument to a state-accessing method has a value outside of the
    /// accepted range of values.
    #[strum(serialize = "argument out of range")]
    ArgumentOutOfRange,

    /// EVM implementation generic internal error.
    #[strum(serialize = "internal error")]
    InternalError,
}

impl std::error::Error for StatusCode {}

/// The kind of call-like instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    Call,
    DelegateCall,
    CallCode,
    Create,
    Create2 { salt: H256 },
}

/// The message describing an EVM call, including a zero-depth call from a
/// transaction origin.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// The kind of the call. For zero-depth calls `CallKind::Call` SHOULD be used.
    pub kind: CallKind,

    /// Static call mode.
    pub is_static: bool,

    /// The call depth.
    pub depth: i32,

    /// The amount of gas for message execution.
    pub gas: i64,

    /// The destination of the message.
    pub destination: Address,

    /// The sender of the message.
    pub sender: Address,

    /// Message input data.
    pub input_data: Bytes,

    /// The amount of Ether transferred with the message.
    pub value: U256,
}

/// Output of EVM execution.
#[derive(Clone, Debug, PartialEq)]
pub struct Output {
    /// EVM exited with this status code.
    pub status_code: StatusCode,
    /// How much gas was left after execution.
    pub gas_left: i64,
    /// Gas refund accrued by SSTORE/SELFDESTRUCT, capped per-fork by the caller.
    pub gas_refund: i64,
    /// Output data returned.
    pub output_data: Bytes,
    /// Contract creation address, set only for CREATE/CREATE2 outcomes.
    pub create_address: Option<Address>,
}

#[inline]
pub(crate) fn u256_to_address(v: U256) -> Address {
    H256(v.into()).into()
}

#[inline]
pub(crate) fn address_to_u256(v: Address) -> U256 {
    U256::from_big_endian(&v.0)
}
