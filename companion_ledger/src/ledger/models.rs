//! Ledger data models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// User ID type (customer or partner)
pub type UserId = Uuid;

/// Booking ID type
pub type BookingId = Uuid;

/// Wallet model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: UserId,
    /// Spendable funds
    pub balance: Decimal,
    /// Funds locked in outstanding escrow owed by this wallet as payer
    pub pending_balance: Decimal,
    pub total_earnings: Decimal,
    pub total_spent: Decimal,
    pub currency: String,
    pub bank_name: Option<String>,
    pub bank_account_no: Option<String>,
    pub bank_account_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// A fresh wallet with zero balances
    pub fn empty(user_id: UserId, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            balance: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            total_spent: Decimal::ZERO,
            currency: currency.to_string(),
            bank_name: None,
            bank_account_no: None,
            bank_account_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bank details on file, if complete
    pub fn bank_info(&self) -> Option<BankInfo> {
        match (
            &self.bank_name,
            &self.bank_account_no,
            &self.bank_account_name,
        ) {
            (Some(bank_name), Some(account_no), Some(account_name)) => Some(BankInfo {
                bank_name: bank_name.clone(),
                account_no: account_no.clone(),
                account_name: account_name.clone(),
            }),
            _ => None,
        }
    }

    /// Store bank details on the wallet
    pub fn set_bank_info(&mut self, info: &BankInfo) {
        self.bank_name = Some(info.bank_name.clone());
        self.bank_account_no = Some(info.account_no.clone());
        self.bank_account_name = Some(info.account_name.clone());
    }
}

/// Payout bank account details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankInfo {
    pub bank_name: String,
    pub account_no: String,
    pub account_name: String,
}

impl BankInfo {
    /// Name of the first blank field, if any
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.bank_name.trim().is_empty() {
            Some("bank_name")
        } else if self.account_no.trim().is_empty() {
            Some("account_no")
        } else if self.account_name.trim().is_empty() {
            Some("account_name")
        } else {
            None
        }
    }
}

/// Which wallet row to lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalletKey {
    User(UserId),
    Id(Uuid),
}

/// Entry direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    Debit,
    Credit,
}

impl fmt::Display for EntryDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryDirection::Debit => write!(f, "debit"),
            EntryDirection::Credit => write!(f, "credit"),
        }
    }
}

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    EscrowHold,
    EscrowRelease,
    EscrowRefund,
}

impl TransactionType {
    /// Whether the entry credits or debits the wallet's spendable balance
    pub fn direction(self) -> EntryDirection {
        match self {
            TransactionType::Deposit
            | TransactionType::EscrowRelease
            | TransactionType::EscrowRefund => EntryDirection::Credit,
            TransactionType::Withdrawal | TransactionType::EscrowHold => EntryDirection::Debit,
        }
    }

    /// Prefix of the human-readable transaction code
    pub fn code_prefix(self) -> &'static str {
        match self {
            TransactionType::Deposit => "TOP",
            TransactionType::Withdrawal => "WD",
            TransactionType::EscrowHold => "PAY",
            TransactionType::EscrowRelease => "EARN",
            TransactionType::EscrowRefund => "REF",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Deposit => write!(f, "DEPOSIT"),
            TransactionType::Withdrawal => write!(f, "WITHDRAWAL"),
            TransactionType::EscrowHold => write!(f, "ESCROW_HOLD"),
            TransactionType::EscrowRelease => write!(f, "ESCROW_RELEASE"),
            TransactionType::EscrowRefund => write!(f, "ESCROW_REFUND"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(TransactionType::Deposit),
            "WITHDRAWAL" => Ok(TransactionType::Withdrawal),
            "ESCROW_HOLD" => Ok(TransactionType::EscrowHold),
            "ESCROW_RELEASE" => Ok(TransactionType::EscrowRelease),
            "ESCROW_REFUND" => Ok(TransactionType::EscrowRefund),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "PENDING"),
            TransactionStatus::Completed => write!(f, "COMPLETED"),
            TransactionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub transaction_code: String,
    pub wallet_id: Uuid,
    pub booking_id: Option<BookingId>,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// Always non-negative; the sign comes from the type's direction
    pub amount: Decimal,
    pub fee: Decimal,
    pub status: TransactionStatus,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub payment_method: Option<String>,
    pub external_tx_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Amount applied to the wallet balance, negative for debits
    pub fn signed_amount(&self) -> Decimal {
        match self.transaction_type.direction() {
            EntryDirection::Credit => self.amount,
            EntryDirection::Debit => -self.amount,
        }
    }
}

/// Transaction to be appended
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_code: String,
    pub wallet_id: Uuid,
    pub booking_id: Option<BookingId>,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub fee: Decimal,
    pub status: TransactionStatus,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub payment_method: Option<String>,
    pub external_tx_id: Option<String>,
}

impl NewTransaction {
    /// Materialize the row with a fresh id and timestamps
    pub fn into_transaction(self) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            transaction_code: self.transaction_code,
            wallet_id: self.wallet_id,
            booking_id: self.booking_id,
            transaction_type: self.transaction_type,
            amount: self.amount,
            fee: self.fee,
            status: self.status,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            description: self.description,
            payment_method: self.payment_method,
            external_tx_id: self.external_tx_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One page of a wallet's transaction history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPage {
    pub items: Vec<Transaction>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

/// Escrow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    Held,
    Released,
    Refunded,
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscrowStatus::Held => write!(f, "HELD"),
            EscrowStatus::Released => write!(f, "RELEASED"),
            EscrowStatus::Refunded => write!(f, "REFUNDED"),
        }
    }
}

impl FromStr for EscrowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HELD" => Ok(EscrowStatus::Held),
            "RELEASED" => Ok(EscrowStatus::Released),
            "REFUNDED" => Ok(EscrowStatus::Refunded),
            other => Err(format!("unknown escrow status: {other}")),
        }
    }
}

/// Funds held for one booking pending service delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowHolding {
    pub id: Uuid,
    pub booking_id: BookingId,
    pub payer_id: UserId,
    pub payee_id: UserId,
    /// Service subtotal owed to the payee
    pub amount: Decimal,
    pub platform_fee: Decimal,
    /// `amount + platform_fee`, debited from the payer
    pub total_amount: Decimal,
    pub status: EscrowStatus,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowHolding {
    pub fn is_held(&self) -> bool {
        self.status == EscrowStatus::Held
    }
}

/// Escrow holding to be created
#[derive(Debug, Clone)]
pub struct NewEscrowHolding {
    pub booking_id: BookingId,
    pub payer_id: UserId,
    pub payee_id: UserId,
    pub amount: Decimal,
    pub platform_fee: Decimal,
}

impl NewEscrowHolding {
    pub fn total_amount(&self) -> Decimal {
        self.amount + self.platform_fee
    }

    /// Materialize a HELD holding with a fresh id and timestamps
    pub fn into_holding(self) -> EscrowHolding {
        let now = Utc::now();
        let total_amount = self.total_amount();
        EscrowHolding {
            id: Uuid::new_v4(),
            booking_id: self.booking_id,
            payer_id: self.payer_id,
            payee_id: self.payee_id,
            amount: self.amount,
            platform_fee: self.platform_fee,
            total_amount,
            status: EscrowStatus::Held,
            released_at: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
