//! Wallet and escrow ledger for the marketplace engine.
//!
//! Holds per-user, per-role balances (available, reserved, bonus) and
//! exposes the escrow primitives the order state machine drives: reserve at
//! order creation, release on cancellation or refund, settle on completion
//! and partial refunds for dispute splits.
//!
//! All amounts are integer minor-currency units. Every operation serializes
//! per wallet through an async lock registry, validates every balance move
//! before applying any of them, and writes an audit transaction record for
//! each mutation inside the same critical section. Partial application is
//! never observable through the service interface.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use market_storage::{StorageError, StorageService};
use market_types::{format_amount, Amount, Role, SettlementSplit, StorageKey, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
	/// The wallet's available balance cannot cover the requested amount.
	/// User-visible: the buyer needs to add funds.
	#[error("Insufficient funds: required {required}, available {available}")]
	InsufficientFunds { required: Amount, available: Amount },
	/// The wallet's reserved balance cannot cover a release or settlement.
	/// Fatal class: reservations are made at order creation, so this
	/// indicates a bug rather than a user error.
	#[error("Insufficient reserved funds: required {required}, reserved {reserved}")]
	InsufficientReserved { required: Amount, reserved: Amount },
	/// A settlement or split does not add up to the reserved amount.
	/// Fatal class: indicates corrupted order terms, never retried.
	#[error("Settlement mismatch: {0}")]
	SettlementMismatch(String),
	/// An amount that must be positive was zero or negative.
	#[error("Invalid amount: {0}")]
	InvalidAmount(Amount),
	/// Error from the storage backend.
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for LedgerError {
	fn from(err: StorageError) -> Self {
		LedgerError::Storage(err.to_string())
	}
}

impl LedgerError {
	/// Whether this error indicates an internal invariant violation that
	/// should alert an operator rather than be surfaced as a user error.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			LedgerError::InsufficientReserved { .. } | LedgerError::SettlementMismatch(_)
		)
	}
}

/// Spendable and held funds for one (user, role) pair.
///
/// Created implicitly on first credit; never deleted. `available` and
/// `reserved` never go negative: every operation validates before applying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalance {
	pub user_id: UserId,
	pub role: Role,
	/// Funds spendable right now.
	pub available: Amount,
	/// Funds earmarked for in-flight orders the user is buyer on.
	pub reserved: Amount,
	/// Promotional funds, a separate bucket from deposits.
	pub bonus: Amount,
	/// Bumped on every persisted mutation.
	pub version: u64,
	pub updated_at: DateTime<Utc>,
}

impl WalletBalance {
	/// A zeroed wallet for a user/role that has never held funds.
	fn empty(user_id: &UserId, role: Role) -> Self {
		Self {
			user_id: user_id.clone(),
			role,
			available: 0,
			reserved: 0,
			bonus: 0,
			version: 0,
			updated_at: Utc::now(),
		}
	}
}

/// Kind of balance mutation, mirrored in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
	/// Funds added from a payment provider.
	Deposit,
	/// Funds reserved for an order at checkout.
	Purchase,
	/// Publisher earnings credited at settlement.
	Earning,
	/// Contributor earnings credited at settlement.
	Contributor,
	/// Reserved funds returned to the buyer.
	Refund,
	/// Funds withdrawn to an external account.
	Withdrawal,
	/// Internal compensation applied when a commit had to be unwound.
	Adjustment,
}

/// Audit record written for every balance mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
	pub id: String,
	pub user_id: UserId,
	pub role: Role,
	pub kind: TransactionKind,
	pub amount: Amount,
	pub balance_before: Amount,
	pub balance_after: Amount,
	/// Order or dispute id this mutation belongs to, when applicable.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reference_id: Option<String>,
	pub description: String,
	pub created_at: DateTime<Utc>,
}

/// A validated balance change ready to be persisted.
///
/// Operations build their full set of writes first, then commit them
/// together; validation failures abort before anything is written.
struct PendingWrite {
	wallet: WalletBalance,
	record: TransactionRecord,
}

/// Service holding wallet balances and applying escrow operations.
pub struct LedgerService {
	storage: Arc<StorageService>,
	/// Per-wallet async locks; operations acquire every involved wallet's
	/// lock in sorted key order before reading balances.
	locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LedgerService {
	/// Creates a new LedgerService backed by the given storage.
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			storage,
			locks: DashMap::new(),
		}
	}

	/// Storage id for a wallet.
	fn wallet_id(user_id: &UserId, role: Role) -> String {
		format!("{}:{}", user_id, role.as_str())
	}

	fn lock_for(&self, wallet_id: &str) -> Arc<Mutex<()>> {
		self.locks
			.entry(wallet_id.to_string())
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone()
	}

	/// Acquires the locks for all given wallet ids in sorted order.
	async fn acquire_ordered(
		&self,
		mut wallet_ids: Vec<String>,
	) -> Vec<tokio::sync::OwnedMutexGuard<()>> {
		wallet_ids.sort();
		wallet_ids.dedup();
		let mut guards = Vec::with_capacity(wallet_ids.len());
		for id in wallet_ids {
			let lock = self.lock_for(&id);
			guards.push(lock.lock_owned().await);
		}
		guards
	}

	/// Loads a wallet, defaulting to an empty one for first-time users.
	async fn load_wallet(
		&self,
		user_id: &UserId,
		role: Role,
	) -> Result<WalletBalance, LedgerError> {
		let id = Self::wallet_id(user_id, role);
		match self
			.storage
			.retrieve::<WalletBalance>(StorageKey::Wallets.as_str(), &id)
			.await
		{
			Ok(wallet) => Ok(wallet),
			Err(StorageError::NotFound) => Ok(WalletBalance::empty(user_id, role)),
			Err(e) => Err(e.into()),
		}
	}

	/// Persists a set of validated writes.
	///
	/// Wallets first, then their audit records. If a later wallet write
	/// fails, the earlier ones are restored from the pre-write snapshots so
	/// a backend fault cannot leave a half-applied settlement behind.
	async fn commit(
		&self,
		snapshots: Vec<WalletBalance>,
		writes: Vec<PendingWrite>,
	) -> Result<(), LedgerError> {
		let mut persisted: Vec<&WalletBalance> = Vec::with_capacity(writes.len());
		for write in &writes {
			let id = Self::wallet_id(&write.wallet.user_id, write.wallet.role);
			if let Err(e) = self
				.storage
				.store(StorageKey::Wallets.as_str(), &id, &write.wallet)
				.await
			{
				for snapshot in snapshots
					.iter()
					.filter(|s| {
						persisted
							.iter()
							.any(|p| p.user_id == s.user_id && p.role == s.role)
					}) {
					let snap_id = Self::wallet_id(&snapshot.user_id, snapshot.role);
					if let Err(restore_err) = self
						.storage
						.store(StorageKey::Wallets.as_str(), &snap_id, snapshot)
						.await
					{
						tracing::error!(
							wallet = %snap_id,
							error = %restore_err,
							"Failed to restore wallet after aborted commit; balances need operator attention"
						);
					}
				}
				return Err(e.into());
			}
			persisted.push(&write.wallet);
		}

		for write in &writes {
			let record_id = format!("{}:{}", write.record.user_id, write.record.id);
			self.storage
				.store(StorageKey::Transactions.as_str(), &record_id, &write.record)
				.await?;
		}
		Ok(())
	}

	fn make_record(
		wallet: &WalletBalance,
		kind: TransactionKind,
		amount: Amount,
		balance_before: Amount,
		reference_id: Option<&str>,
		description: String,
	) -> TransactionRecord {
		TransactionRecord {
			id: Uuid::new_v4().to_string(),
			user_id: wallet.user_id.clone(),
			role: wallet.role,
			kind,
			amount,
			balance_before,
			balance_after: wallet.available,
			reference_id: reference_id.map(str::to_string),
			description,
			created_at: Utc::now(),
		}
	}

	fn touch(wallet: &mut WalletBalance) {
		wallet.version += 1;
		wallet.updated_at = Utc::now();
	}

	/// Returns the current balances for a user/role, zeroed if never funded.
	pub async fn balance(&self, user_id: &UserId, role: Role) -> Result<WalletBalance, LedgerError> {
		self.load_wallet(user_id, role).await
	}

	/// Lists the audit records for a user, most recent last.
	pub async fn transactions(
		&self,
		user_id: &UserId,
	) -> Result<Vec<TransactionRecord>, LedgerError> {
		let namespace = format!("{}:{}", StorageKey::Transactions.as_str(), user_id);
		let ids = self.storage.list_ids(&namespace).await?;
		let mut records = Vec::with_capacity(ids.len());
		for id in ids {
			let record: TransactionRecord = self.storage.retrieve(&namespace, &id).await?;
			records.push(record);
		}
		records.sort_by_key(|r| r.created_at);
		Ok(records)
	}

	/// Credits a user's available balance (deposit or adjustment).
	pub async fn credit(
		&self,
		user_id: &UserId,
		role: Role,
		amount: Amount,
		kind: TransactionKind,
		description: &str,
	) -> Result<WalletBalance, LedgerError> {
		if amount <= 0 {
			return Err(LedgerError::InvalidAmount(amount));
		}
		let wallet_id = Self::wallet_id(user_id, role);
		let _guards = self.acquire_ordered(vec![wallet_id]).await;

		let mut wallet = self.load_wallet(user_id, role).await?;
		let snapshot = wallet.clone();
		let before = wallet.available;
		wallet.available += amount;
		Self::touch(&mut wallet);

		let record = Self::make_record(&wallet, kind, amount, before, None, description.to_string());
		self.commit(vec![snapshot], vec![PendingWrite { wallet: wallet.clone(), record }])
			.await?;
		Ok(wallet)
	}

	/// Credits a user's bonus balance (promotional funds).
	///
	/// Bonus funds are a separate bucket from deposits and are not
	/// reservable for orders.
	pub async fn credit_bonus(
		&self,
		user_id: &UserId,
		role: Role,
		amount: Amount,
		description: &str,
	) -> Result<WalletBalance, LedgerError> {
		if amount <= 0 {
			return Err(LedgerError::InvalidAmount(amount));
		}
		let wallet_id = Self::wallet_id(user_id, role);
		let _guards = self.acquire_ordered(vec![wallet_id]).await;

		let mut wallet = self.load_wallet(user_id, role).await?;
		let snapshot = wallet.clone();
		let before = wallet.available;
		wallet.bonus += amount;
		Self::touch(&mut wallet);

		let record = Self::make_record(
			&wallet,
			TransactionKind::Deposit,
			amount,
			before,
			None,
			description.to_string(),
		);
		self.commit(vec![snapshot], vec![PendingWrite { wallet: wallet.clone(), record }])
			.await?;
		Ok(wallet)
	}

	/// Debits a user's available balance (withdrawal or adjustment).
	pub async fn debit(
		&self,
		user_id: &UserId,
		role: Role,
		amount: Amount,
		kind: TransactionKind,
		description: &str,
	) -> Result<WalletBalance, LedgerError> {
		if amount <= 0 {
			return Err(LedgerError::InvalidAmount(amount));
		}
		let wallet_id = Self::wallet_id(user_id, role);
		let _guards = self.acquire_ordered(vec![wallet_id]).await;

		let mut wallet = self.load_wallet(user_id, role).await?;
		if wallet.available < amount {
			return Err(LedgerError::InsufficientFunds {
				required: amount,
				available: wallet.available,
			});
		}
		let snapshot = wallet.clone();
		let before = wallet.available;
		wallet.available -= amount;
		Self::touch(&mut wallet);

		let record = Self::make_record(&wallet, kind, amount, before, None, description.to_string());
		self.commit(vec![snapshot], vec![PendingWrite { wallet: wallet.clone(), record }])
			.await?;
		Ok(wallet)
	}

	/// Moves `amount` from a buyer's available balance into reserve.
	///
	/// Called synchronously at order creation. Fails with
	/// `InsufficientFunds` without touching anything if the buyer cannot
	/// cover the order.
	pub async fn reserve(
		&self,
		buyer_id: &UserId,
		amount: Amount,
		order_id: &str,
		description: &str,
	) -> Result<WalletBalance, LedgerError> {
		if amount <= 0 {
			return Err(LedgerError::InvalidAmount(amount));
		}
		let wallet_id = Self::wallet_id(buyer_id, Role::Buyer);
		let _guards = self.acquire_ordered(vec![wallet_id]).await;

		let mut wallet = self.load_wallet(buyer_id, Role::Buyer).await?;
		if wallet.available < amount {
			return Err(LedgerError::InsufficientFunds {
				required: amount,
				available: wallet.available,
			});
		}
		let snapshot = wallet.clone();
		let before = wallet.available;
		wallet.available -= amount;
		wallet.reserved += amount;
		Self::touch(&mut wallet);

		let record = Self::make_record(
			&wallet,
			TransactionKind::Purchase,
			amount,
			before,
			Some(order_id),
			description.to_string(),
		);
		self.commit(vec![snapshot], vec![PendingWrite { wallet: wallet.clone(), record }])
			.await?;
		Ok(wallet)
	}

	/// Returns `amount` from a buyer's reserve back to available.
	///
	/// Used on cancellation before delivery and on full refunds.
	pub async fn release(
		&self,
		buyer_id: &UserId,
		amount: Amount,
		order_id: &str,
		description: &str,
	) -> Result<WalletBalance, LedgerError> {
		if amount <= 0 {
			return Err(LedgerError::InvalidAmount(amount));
		}
		let wallet_id = Self::wallet_id(buyer_id, Role::Buyer);
		let _guards = self.acquire_ordered(vec![wallet_id]).await;

		let mut wallet = self.load_wallet(buyer_id, Role::Buyer).await?;
		if wallet.reserved < amount {
			return Err(LedgerError::InsufficientReserved {
				required: amount,
				reserved: wallet.reserved,
			});
		}
		let snapshot = wallet.clone();
		let before = wallet.available;
		wallet.reserved -= amount;
		wallet.available += amount;
		Self::touch(&mut wallet);

		let record = Self::make_record(
			&wallet,
			TransactionKind::Refund,
			amount,
			before,
			Some(order_id),
			description.to_string(),
		);
		self.commit(vec![snapshot], vec![PendingWrite { wallet: wallet.clone(), record }])
			.await?;
		Ok(wallet)
	}

	/// Converts a buyer's reserved funds into publisher (and contributor)
	/// earnings at order completion.
	///
	/// The split's amounts were fixed at order creation; this checks they
	/// still sum to `expected_total`, removes that total from the buyer's
	/// reserve permanently, credits each payee's available balance and
	/// retains the platform fee. Either every balance updates or none does.
	pub async fn settle(
		&self,
		buyer_id: &UserId,
		split: &SettlementSplit,
		expected_total: Amount,
		order_id: &str,
	) -> Result<(), LedgerError> {
		if split.publisher_amount < 0
			|| split.platform_fee < 0
			|| split.contributor.as_ref().is_some_and(|c| c.amount < 0)
		{
			return Err(LedgerError::SettlementMismatch(
				"negative amount in settlement split".to_string(),
			));
		}
		if split.total() != expected_total {
			return Err(LedgerError::SettlementMismatch(format!(
				"split sums to {} but order reserved {}",
				split.total(),
				expected_total
			)));
		}

		let buyer_wallet_id = Self::wallet_id(buyer_id, Role::Buyer);
		let publisher_wallet_id = Self::wallet_id(&split.publisher_id, Role::Publisher);
		let mut lock_ids = vec![buyer_wallet_id, publisher_wallet_id];
		if let Some(cut) = &split.contributor {
			lock_ids.push(Self::wallet_id(&cut.user_id, Role::Contributor));
		}
		let _guards = self.acquire_ordered(lock_ids).await;

		let mut buyer = self.load_wallet(buyer_id, Role::Buyer).await?;
		if buyer.reserved < expected_total {
			return Err(LedgerError::InsufficientReserved {
				required: expected_total,
				reserved: buyer.reserved,
			});
		}
		let mut publisher = self
			.load_wallet(&split.publisher_id, Role::Publisher)
			.await?;

		let mut snapshots = vec![buyer.clone(), publisher.clone()];
		let mut writes = Vec::new();

		let buyer_before = buyer.available;
		buyer.reserved -= expected_total;
		Self::touch(&mut buyer);
		writes.push(PendingWrite {
			record: Self::make_record(
				&buyer,
				TransactionKind::Purchase,
				expected_total,
				buyer_before,
				Some(order_id),
				format!("Escrow released for order ({})", format_amount(expected_total)),
			),
			wallet: buyer,
		});

		let publisher_before = publisher.available;
		publisher.available += split.publisher_amount;
		Self::touch(&mut publisher);
		writes.push(PendingWrite {
			record: Self::make_record(
				&publisher,
				TransactionKind::Earning,
				split.publisher_amount,
				publisher_before,
				Some(order_id),
				format!("Earnings from order ({})", format_amount(split.publisher_amount)),
			),
			wallet: publisher,
		});

		if let Some(cut) = &split.contributor {
			let mut contributor = self.load_wallet(&cut.user_id, Role::Contributor).await?;
			snapshots.push(contributor.clone());
			let contributor_before = contributor.available;
			contributor.available += cut.amount;
			Self::touch(&mut contributor);
			writes.push(PendingWrite {
				record: Self::make_record(
					&contributor,
					TransactionKind::Contributor,
					cut.amount,
					contributor_before,
					Some(order_id),
					format!("Contributor earnings from order ({})", format_amount(cut.amount)),
				),
				wallet: contributor,
			});
		}

		self.commit(snapshots, writes).await
	}

	/// Reverses a previously applied settlement.
	///
	/// Compensation path used when the order commit paired with a
	/// settlement could not be persisted: payee credits are debited back
	/// and the total returns to the buyer's reserve. Fails if a payee has
	/// already spent the funds, which is logged by the caller as an
	/// operator-attention condition.
	pub async fn reverse_settle(
		&self,
		buyer_id: &UserId,
		split: &SettlementSplit,
		expected_total: Amount,
		order_id: &str,
	) -> Result<(), LedgerError> {
		let buyer_wallet_id = Self::wallet_id(buyer_id, Role::Buyer);
		let publisher_wallet_id = Self::wallet_id(&split.publisher_id, Role::Publisher);
		let mut lock_ids = vec![buyer_wallet_id, publisher_wallet_id];
		if let Some(cut) = &split.contributor {
			lock_ids.push(Self::wallet_id(&cut.user_id, Role::Contributor));
		}
		let _guards = self.acquire_ordered(lock_ids).await;

		let mut publisher = self
			.load_wallet(&split.publisher_id, Role::Publisher)
			.await?;
		if publisher.available < split.publisher_amount {
			return Err(LedgerError::InsufficientFunds {
				required: split.publisher_amount,
				available: publisher.available,
			});
		}
		let mut buyer = self.load_wallet(buyer_id, Role::Buyer).await?;

		let mut snapshots = vec![buyer.clone(), publisher.clone()];
		let mut writes = Vec::new();

		let publisher_before = publisher.available;
		publisher.available -= split.publisher_amount;
		Self::touch(&mut publisher);
		writes.push(PendingWrite {
			record: Self::make_record(
				&publisher,
				TransactionKind::Adjustment,
				split.publisher_amount,
				publisher_before,
				Some(order_id),
				"Settlement reversed".to_string(),
			),
			wallet: publisher,
		});

		if let Some(cut) = &split.contributor {
			let mut contributor = self.load_wallet(&cut.user_id, Role::Contributor).await?;
			if contributor.available < cut.amount {
				return Err(LedgerError::InsufficientFunds {
					required: cut.amount,
					available: contributor.available,
				});
			}
			snapshots.push(contributor.clone());
			let contributor_before = contributor.available;
			contributor.available -= cut.amount;
			Self::touch(&mut contributor);
			writes.push(PendingWrite {
				record: Self::make_record(
					&contributor,
					TransactionKind::Adjustment,
					cut.amount,
					contributor_before,
					Some(order_id),
					"Settlement reversed".to_string(),
				),
				wallet: contributor,
			});
		}

		let buyer_before = buyer.available;
		buyer.reserved += expected_total;
		Self::touch(&mut buyer);
		writes.push(PendingWrite {
			record: Self::make_record(
				&buyer,
				TransactionKind::Adjustment,
				expected_total,
				buyer_before,
				Some(order_id),
				"Escrow restored after settlement reversal".to_string(),
			),
			wallet: buyer,
		});

		self.commit(snapshots, writes).await
	}

	/// Splits a buyer's reserved funds between the parties at dispute
	/// resolution.
	///
	/// `to_buyer + to_publisher` must equal `expected_total` (the order's
	/// reserved amount) or the operation fails with `SettlementMismatch`
	/// before any balance moves. The publisher is credited
	/// `to_publisher - fee_on_publisher`.
	pub async fn refund_partial(
		&self,
		buyer_id: &UserId,
		publisher_id: &UserId,
		to_buyer: Amount,
		to_publisher: Amount,
		fee_on_publisher: Amount,
		expected_total: Amount,
		reference_id: &str,
	) -> Result<(), LedgerError> {
		if to_buyer < 0 || to_publisher < 0 || fee_on_publisher < 0 {
			return Err(LedgerError::SettlementMismatch(
				"negative amount in partial refund".to_string(),
			));
		}
		if to_buyer + to_publisher != expected_total {
			return Err(LedgerError::SettlementMismatch(format!(
				"partial refund sums to {} but order reserved {}",
				to_buyer + to_publisher,
				expected_total
			)));
		}
		if fee_on_publisher > to_publisher {
			return Err(LedgerError::SettlementMismatch(format!(
				"fee {} exceeds publisher share {}",
				fee_on_publisher, to_publisher
			)));
		}

		let buyer_wallet_id = Self::wallet_id(buyer_id, Role::Buyer);
		let publisher_wallet_id = Self::wallet_id(publisher_id, Role::Publisher);
		let _guards = self
			.acquire_ordered(vec![buyer_wallet_id, publisher_wallet_id])
			.await;

		let mut buyer = self.load_wallet(buyer_id, Role::Buyer).await?;
		if buyer.reserved < expected_total {
			return Err(LedgerError::InsufficientReserved {
				required: expected_total,
				reserved: buyer.reserved,
			});
		}
		let mut publisher = self.load_wallet(publisher_id, Role::Publisher).await?;

		let snapshots = vec![buyer.clone(), publisher.clone()];
		let mut writes = Vec::new();

		let buyer_before = buyer.available;
		buyer.reserved -= expected_total;
		buyer.available += to_buyer;
		Self::touch(&mut buyer);
		writes.push(PendingWrite {
			record: Self::make_record(
				&buyer,
				TransactionKind::Refund,
				to_buyer,
				buyer_before,
				Some(reference_id),
				format!("Dispute refund ({})", format_amount(to_buyer)),
			),
			wallet: buyer,
		});

		let publisher_net = to_publisher - fee_on_publisher;
		let publisher_before = publisher.available;
		publisher.available += publisher_net;
		Self::touch(&mut publisher);
		writes.push(PendingWrite {
			record: Self::make_record(
				&publisher,
				TransactionKind::Earning,
				publisher_net,
				publisher_before,
				Some(reference_id),
				format!("Dispute settlement ({})", format_amount(publisher_net)),
			),
			wallet: publisher,
		});

		self.commit(snapshots, writes).await
	}
}
