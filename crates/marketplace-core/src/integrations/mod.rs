//! 第三方集成
//!
//! 均为可选：未配置时构造函数返回 None，调用方按降级路径处理。

pub mod cloudinary;
pub mod paystack;

pub use cloudinary::{CloudinarySigner, UploadPurpose, UploadSignature};
pub use paystack::{
    InitializeRequest, InitializedTransaction, PaymentGateway, PaystackClient, PaystackEvent,
    RecipientRequest, TransferReceipt, TransferRequest, VerifiedTransaction,
};

#[cfg(test)]
pub use paystack::MockPaymentGateway;
