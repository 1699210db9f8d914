//! Chain clients: bitcoin-style JSON-RPC for the mainchain, Ethereum-style
//! JSON-RPC plus REST for the sidechain.

pub mod error;
pub mod mainchain;
pub mod options;
pub mod sidechain;

pub use error::RpcError;
pub use mainchain::MainchainRpcClient;
pub use options::RpcClientOptions;
pub use sidechain::SidechainClient;
