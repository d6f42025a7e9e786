//! Domain types for the prize draw core.
//!
//! Identifiers, the competition attributes the core reads, tickets and their
//! reservation state, and the draw/winner records produced by the draw engine.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a competition
    CompetitionId
);
uuid_id!(
    /// Unique identifier for a ticket row
    TicketId
);
uuid_id!(
    /// Unique identifier for a buyer
    OwnerId
);
uuid_id!(
    /// Unique identifier for an order created by the checkout collaborator
    OrderId
);
uuid_id!(
    /// Unique identifier for a draw record
    DrawId
);
uuid_id!(
    /// Unique identifier for a winner row
    WinnerId
);

/// Ticket number within a competition. Numbers start at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketNumber(u32);

impl TicketNumber {
    /// The lowest ticket number issued by the allocator.
    pub const FIRST: Self = Self(1);

    /// Creates a ticket number. Returns `None` for zero.
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        if value == 0 { None } else { Some(Self(value)) }
    }

    /// Get the numeric value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// The following ticket number, or `None` on overflow.
    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Competition
// ============================================================================

/// Maximum number of tickets a competition can issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketLimit {
    /// At most this many ticket numbers (1..=n) exist
    Limited(u32),
    /// No upper bound on ticket numbers
    Unlimited,
}

impl TicketLimit {
    /// Remaining capacity given the number of currently unavailable tickets.
    ///
    /// `None` means unbounded.
    #[must_use]
    pub const fn remaining(&self, unavailable: usize) -> Option<u32> {
        match self {
            Self::Limited(limit) => {
                #[allow(clippy::cast_possible_truncation)]
                let used = if unavailable > u32::MAX as usize {
                    u32::MAX
                } else {
                    unavailable as u32
                };
                Some(limit.saturating_sub(used))
            }
            Self::Unlimited => None,
        }
    }

    /// Whether `number` falls inside the issuable range.
    #[must_use]
    pub const fn contains(&self, number: TicketNumber) -> bool {
        match self {
            Self::Limited(limit) => number.value() <= *limit,
            Self::Unlimited => true,
        }
    }

    /// Database representation (`NULL` for unlimited).
    #[must_use]
    pub const fn as_option(&self) -> Option<u32> {
        match self {
            Self::Limited(limit) => Some(*limit),
            Self::Unlimited => None,
        }
    }

    /// Build from the database representation.
    #[must_use]
    pub const fn from_option(limit: Option<u32>) -> Self {
        match limit {
            Some(limit) => Self::Limited(limit),
            None => Self::Unlimited,
        }
    }
}

/// Lifecycle status of a competition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionStatus {
    /// Being prepared, not on sale
    Draft,
    /// On sale
    Live,
    /// Sales closed, awaiting draw
    Closed,
    /// Winners selected
    Drawn,
    /// Withdrawn
    Cancelled,
}

impl CompetitionStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Live => "live",
            Self::Closed => "closed",
            Self::Drawn => "drawn",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "live" => Some(Self::Live),
            "closed" => Some(Self::Closed),
            "drawn" => Some(Self::Drawn),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// How a draw was (or will be) initiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawMethod {
    /// Run by the scheduler at `draw_at`
    Automatic,
    /// Run on demand by an administrator
    AdminTriggered,
    /// Winner designated directly by an operator
    Manual,
}

impl DrawMethod {
    /// Convert method to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::AdminTriggered => "admin_triggered",
            Self::Manual => "manual",
        }
    }

    /// Parse method from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "automatic" => Some(Self::Automatic),
            "admin_triggered" => Some(Self::AdminTriggered),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// The competition attributes the core reads and writes.
///
/// Everything else about a competition (title, prize, pricing) belongs to the
/// content-management collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competition {
    /// Competition ID
    pub id: CompetitionId,
    /// Ticket limit
    pub ticket_limit: TicketLimit,
    /// Tickets promoted to ACTIVE so far
    pub tickets_sold: u32,
    /// Current status
    pub status: CompetitionStatus,
    /// Scheduled draw time
    pub draw_at: Option<DateTime<Utc>>,
    /// End of the sales window
    pub ends_at: Option<DateTime<Utc>>,
    /// When the draw happened
    pub drawn_at: Option<DateTime<Utc>>,
    /// How the draw is initiated
    pub draw_mode: DrawMethod,
}

impl Competition {
    /// A live competition with the given limit and no schedule.
    #[must_use]
    pub fn live(ticket_limit: TicketLimit) -> Self {
        Self {
            id: CompetitionId::new(),
            ticket_limit,
            tickets_sold: 0,
            status: CompetitionStatus::Live,
            draw_at: None,
            ends_at: None,
            drawn_at: None,
            draw_mode: DrawMethod::AdminTriggered,
        }
    }

    /// Why tickets cannot be reserved right now, if they cannot.
    #[must_use]
    pub fn purchase_blocker(&self, now: DateTime<Utc>) -> Option<String> {
        if self.status != CompetitionStatus::Live {
            return Some(format!(
                "competition {} is {} and not open for entries",
                self.id,
                self.status.as_str()
            ));
        }
        if self.ends_at.is_some_and(|ends_at| now >= ends_at) {
            return Some(format!("competition {} has ended", self.id));
        }
        None
    }

    /// Whether a draw may be run in the current status.
    #[must_use]
    pub const fn is_drawable(&self) -> bool {
        matches!(self.status, CompetitionStatus::Live | CompetitionStatus::Closed)
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// Ticket lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Held for a buyer until `reserved_until`
    Reserved,
    /// Paid for and eligible for the draw
    Active,
    /// Selected by a draw
    Winner,
}

impl TicketStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Active => "active",
            Self::Winner => "winner",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reserved" => Some(Self::Reserved),
            "active" => Some(Self::Active),
            "winner" => Some(Self::Winner),
            _ => None,
        }
    }
}

/// A ticket row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: TicketId,
    /// Competition the number belongs to
    pub competition_id: CompetitionId,
    /// Number, unique per competition
    pub number: TicketNumber,
    /// Lifecycle status
    pub status: TicketStatus,
    /// Buyer, once known
    pub owner_id: Option<OwnerId>,
    /// Order the reservation is bound to
    pub order_id: Option<OrderId>,
    /// Expiry, present only while reserved
    pub reserved_until: Option<DateTime<Utc>>,
    /// False when the attached skill-question answer was wrong
    pub is_valid: bool,
    /// When the row was created
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// A fresh reservation row.
    #[must_use]
    pub fn reserved(
        competition_id: CompetitionId,
        number: TicketNumber,
        owner_id: Option<OwnerId>,
        now: DateTime<Utc>,
        reserved_until: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TicketId::new(),
            competition_id,
            number,
            status: TicketStatus::Reserved,
            owner_id,
            order_id: None,
            reserved_until: Some(reserved_until),
            is_valid: true,
            created_at: now,
        }
    }

    /// A RESERVED row whose hold has lapsed. Logically free.
    #[must_use]
    pub fn is_expired_reservation(&self, now: DateTime<Utc>) -> bool {
        self.status == TicketStatus::Reserved
            && self.reserved_until.is_none_or(|until| until <= now)
    }

    /// Whether the number counts against capacity at `now`.
    #[must_use]
    pub fn is_unavailable(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired_reservation(now)
    }

    /// Whether the ticket belongs in a draw snapshot.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.status == TicketStatus::Active && self.is_valid
    }

    /// The snapshot entry for this ticket.
    #[must_use]
    pub const fn entry(&self) -> SnapshotEntry {
        SnapshotEntry {
            ticket_id: self.id,
            ticket_number: self.number,
            owner_id: self.owner_id,
        }
    }
}

/// Result of a successful reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Competition reserved against
    pub competition_id: CompetitionId,
    /// Reserved numbers, ascending
    pub ticket_numbers: Vec<TicketNumber>,
    /// Hold expiry
    pub reserved_until: DateTime<Utc>,
    /// Buyer, if known at reservation time
    pub owner_id: Option<OwnerId>,
}

/// Capacity picture for a competition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Competition queried
    pub competition_id: CompetitionId,
    /// Configured limit
    pub ticket_limit: TicketLimit,
    /// ACTIVE + WINNER + unexpired RESERVED
    pub unavailable: u32,
    /// Numbers still issuable (`None` when unlimited)
    pub remaining: Option<u32>,
}

// ============================================================================
// Orders
// ============================================================================

/// Status of an order as seen by the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Checkout started, awaiting payment
    Pending,
    /// Payment confirmed, tickets promoted
    Completed,
}

impl OrderStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// The slice of an order the core needs for atomic promotion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order ID (assigned by the checkout collaborator)
    pub id: OrderId,
    /// Competition the bound tickets belong to
    pub competition_id: CompetitionId,
    /// Buyer
    pub owner_id: OwnerId,
    /// Status
    pub status: OrderStatus,
    /// Number of ticket rows bound to this order
    pub ticket_count: u32,
    /// When the order was first bound
    pub created_at: DateTime<Utc>,
    /// When payment was confirmed
    pub completed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Draws
// ============================================================================

/// Length of a draw seed in bytes (256 bits).
pub const SEED_LEN: usize = 32;

/// Secret per-draw seed. Serialized as lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Seed([u8; SEED_LEN]);

impl Seed {
    /// Wrap raw seed bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SEED_LEN]) -> Self {
        Self(bytes)
    }

    /// Draw a fresh seed from the given RNG.
    pub fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; SEED_LEN];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }

    /// Lowercase hex encoding
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hex encoded seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid seed hex: {e}"))?;
        let bytes: [u8; SEED_LEN] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| format!("seed must be {SEED_LEN} bytes, got {}", v.len()))?;
        Ok(Self(bytes))
    }
}

// Seeds are disclosed through the audit transcript, not through logs.
impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed(..)")
    }
}

impl Serialize for Seed {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Seed {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// One ticket as captured in a draw snapshot or result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Ticket ID (the keyed digest message)
    pub ticket_id: TicketId,
    /// Ticket number
    pub ticket_number: TicketNumber,
    /// Owner at snapshot time
    pub owner_id: Option<OwnerId>,
}

/// Auditable record of a draw.
///
/// `seed`, `snapshot`, its fingerprint and `result` are written once and never edited; only
/// `notes` and `evidence` may be annotated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawRecord {
    /// Draw ID
    pub id: DrawId,
    /// Competition drawn
    pub competition_id: CompetitionId,
    /// Secret seed, disclosed for audit
    pub seed: Seed,
    /// Versioned selection algorithm tag
    pub algorithm: String,
    /// Eligible tickets ordered by ticket number
    pub snapshot: Vec<SnapshotEntry>,
    /// SHA-256 commitment to `snapshot`, fixed when the draw is recorded
    pub snapshot_fingerprint: String,
    /// Selected tickets, primary first then reserves
    pub result: Vec<SnapshotEntry>,
    /// How the draw was initiated
    pub method: DrawMethod,
    /// Actor that initiated the draw
    pub initiated_by: Option<String>,
    /// Operator notes
    pub notes: Option<String>,
    /// External evidence references (stream recordings, witness statements)
    pub evidence: Vec<String>,
    /// When the draw was recorded
    pub created_at: DateTime<Utc>,
}

impl DrawRecord {
    /// The primary winner, if any.
    #[must_use]
    pub fn primary(&self) -> Option<&SnapshotEntry> {
        self.result.first()
    }
}

/// Code a winner presents to redeem their prize.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimCode(String);

impl ClaimCode {
    /// Claim code length in characters.
    pub const LEN: usize = 12;

    // No 0/O or 1/I so codes survive being read aloud.
    const ALPHABET: &'static [u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

    /// Generate a random claim code.
    pub fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let code = (0..Self::LEN)
            .map(|_| {
                let idx = (rng.next_u32() as usize) % Self::ALPHABET.len();
                char::from(Self::ALPHABET[idx])
            })
            .collect();
        Self(code)
    }

    /// Wrap an existing code (as stored or presented by a winner).
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_ascii_uppercase())
    }

    /// The code text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClaimCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A selected ticket: the primary winner (rank 0) or a reserve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    /// Winner ID
    pub id: WinnerId,
    /// Draw that selected this ticket
    pub draw_id: DrawId,
    /// Competition
    pub competition_id: CompetitionId,
    /// Winning ticket
    pub ticket_id: TicketId,
    /// Winning ticket number
    pub ticket_number: TicketNumber,
    /// Ticket owner
    pub owner_id: Option<OwnerId>,
    /// Position in the result (0 = primary)
    pub rank: u32,
    /// Redemption code
    pub claim_code: ClaimCode,
    /// When the winner was notified
    pub notified_at: Option<DateTime<Utc>>,
    /// When the prize was claimed
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Winner {
    /// Whether this is the primary winner
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.rank == 0
    }

    /// Whether the winner has been notified
    #[must_use]
    pub const fn is_notified(&self) -> bool {
        self.notified_at.is_some()
    }

    /// Whether the prize has been claimed
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        self.claimed_at.is_some()
    }
}
