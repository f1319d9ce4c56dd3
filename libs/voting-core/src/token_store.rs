//! The token store: owns every voting token and answers whether a token is
//! currently redeemable.
//!
//! Locking is two-level. The index of tokens sits behind a read/write lock
//! and each token has its own mutex. Redemption takes the index for reading
//! and locks only the token being redeemed, so votes cast with different
//! tokens never wait on each other. Provisioning and cleanup take the index
//! for writing and therefore wait for every in-flight redemption.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::Serialize;
use time::OffsetDateTime;
use types_rs::{Token, TokenId, TokenStatus};

use crate::error::{Error, Result};

/// Largest number of tokens a single `generate` call may mint.
pub const DEFAULT_MAX_BATCH: usize = 5000;

/// Token ids are drawn from digits and uppercase letters, which keeps them
/// unambiguous under case-insensitive lookup.
const ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I',
    'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

/// Returns a random, well-formed token id. Uniqueness is not guaranteed here;
/// see [`generate`].
pub fn random_token_id() -> TokenId {
    TokenId::new(nanoid::format(
        nanoid::rngs::default,
        &ALPHABET,
        TokenId::LENGTH,
    ))
}

/// Mints `count` fresh tokens whose ids are distinct from each other and for
/// which `is_taken` returns false.
///
/// # Errors
///
/// Returns [`Error::GenerationBoundsExceeded`] if `count` is zero or larger
/// than `max`.
pub fn generate(
    count: usize,
    is_taken: impl Fn(&TokenId) -> bool,
    max: usize,
) -> Result<Vec<Token>> {
    generate_with(
        count,
        is_taken,
        max,
        OffsetDateTime::now_utc(),
        random_token_id,
    )
}

/// Same as [`generate`], drawing candidate ids from `next_id`. Ids that
/// collide with `is_taken` or with an id minted earlier in the same batch are
/// discarded and drawn again.
pub fn generate_with(
    count: usize,
    is_taken: impl Fn(&TokenId) -> bool,
    max: usize,
    created_at: OffsetDateTime,
    mut next_id: impl FnMut() -> TokenId,
) -> Result<Vec<Token>> {
    if !(1..=max).contains(&count) {
        return Err(Error::GenerationBoundsExceeded {
            requested: count,
            max,
        });
    }

    let mut minted = HashSet::with_capacity(count);
    let mut tokens = Vec::with_capacity(count);
    let mut collisions = 0_usize;

    while tokens.len() < count {
        let id = next_id();
        if is_taken(&id) || minted.contains(&id) {
            collisions += 1;
            continue;
        }
        minted.insert(id.clone());
        tokens.push(Token::new(id, created_at));
    }

    if collisions > 0 {
        tracing::debug!("discarded {collisions} colliding token ids while minting {count}");
    }

    Ok(tokens)
}

/// Marks an active token as used and returns the redemption time, which is
/// never earlier than the token's creation time.
pub(crate) fn redeem_token(token: &mut Token, now: OffsetDateTime) -> Result<OffsetDateTime> {
    match token.status {
        TokenStatus::Used => Err(Error::TokenAlreadyUsed(token.id.clone())),
        TokenStatus::Active => {
            let used_at = now.max(token.created_at);
            token.status = TokenStatus::Used;
            token.used_at = Some(used_at);
            Ok(used_at)
        }
    }
}

/// Reverts [`redeem_token`]. Only the vote coordinator's compensation path
/// may call this.
pub(crate) fn release_token(token: &mut Token) {
    token.status = TokenStatus::Active;
    token.used_at = None;
}

#[derive(Debug, Default)]
struct Index {
    /// Token ids in creation order.
    order: Vec<TokenId>,
    slots: HashMap<TokenId, Mutex<Token>>,
}

impl Index {
    fn insert(&mut self, token: Token) {
        self.order.push(token.id.clone());
        self.slots.insert(token.id.clone(), Mutex::new(token));
    }
}

#[derive(Debug)]
pub struct TokenStore {
    index: RwLock<Index>,
    max_batch: usize,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH)
    }
}

impl TokenStore {
    /// Creates an empty store whose `generate` accepts at most `max_batch`
    /// tokens per call.
    pub fn new(max_batch: usize) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            max_batch,
        }
    }

    pub const fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// Mints `count` new active tokens that collide with nothing already in
    /// the store, and adds them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GenerationBoundsExceeded`] if `count` is outside
    /// `1..=max_batch`. The store is unchanged in that case.
    pub fn generate(&self, count: usize) -> Result<Vec<Token>> {
        let mut index = self.index.write();
        let tokens = generate(count, |id| index.slots.contains_key(id), self.max_batch)?;
        for token in &tokens {
            index.insert(token.clone());
        }
        tracing::info!("generated {} voting tokens", tokens.len());
        Ok(tokens)
    }

    /// Adds active tokens with the given ids, e.g. from a fixture. Ids that
    /// are already present are skipped. Returns the tokens that were added.
    pub fn provision(&self, ids: impl IntoIterator<Item = TokenId>) -> Vec<Token> {
        let created_at = OffsetDateTime::now_utc();
        let mut index = self.index.write();
        let mut added = Vec::new();
        for id in ids {
            if index.slots.contains_key(&id) {
                tracing::warn!("skipping duplicate token id {id}");
                continue;
            }
            let token = Token::new(id, created_at);
            index.insert(token.clone());
            added.push(token);
        }
        added
    }

    /// Redeems a token on its own, outside of any vote.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenNotFound`] or [`Error::TokenAlreadyUsed`].
    pub fn redeem(&self, id: &TokenId) -> Result<Token> {
        self.with_token(id, |token| {
            redeem_token(token, OffsetDateTime::now_utc())?;
            Ok(token.clone())
        })
    }

    /// Runs `f` with exclusive access to one token. The token stays locked,
    /// and provisioning and cleanup stay blocked, until `f` returns.
    pub(crate) fn with_token<T>(
        &self,
        id: &TokenId,
        f: impl FnOnce(&mut Token) -> Result<T>,
    ) -> Result<T> {
        let index = self.index.read();
        let slot = index
            .slots
            .get(id)
            .ok_or_else(|| Error::TokenNotFound(id.clone()))?;
        let mut token = slot.lock();
        f(&mut token)
    }

    pub fn get(&self, id: &TokenId) -> Option<Token> {
        self.index.read().slots.get(id).map(|slot| slot.lock().clone())
    }

    /// Removes every active token. Used tokens are audit records and are
    /// never removed. Returns how many tokens were removed.
    pub fn delete_unused(&self) -> usize {
        let mut index = self.index.write();
        let Index { order, slots } = &mut *index;
        let before = slots.len();
        slots.retain(|_, slot| slot.get_mut().status == TokenStatus::Used);
        order.retain(|id| slots.contains_key(id));
        let removed = before - slots.len();
        tracing::info!("deleted {removed} unused voting tokens");
        removed
    }

    /// Returns a read-only view of every token in creation order.
    pub fn export(&self) -> TokenExport<'_> {
        TokenExport {
            index: self.index.read(),
        }
    }

    pub fn stats(&self) -> TokenStats {
        let index = self.index.read();
        let total = index.slots.len();
        let used = index
            .slots
            .values()
            .filter(|slot| slot.lock().status == TokenStatus::Used)
            .count();
        TokenStats {
            total,
            used,
            active: total - used,
        }
    }

    pub fn len(&self) -> usize {
        self.index.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Token counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenStats {
    pub total: usize,
    pub used: usize,
    pub active: usize,
}

/// One exported token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub id: TokenId,
    pub status: TokenStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub used_at: Option<OffsetDateTime>,
}

impl From<&Token> for ExportRow {
    fn from(token: &Token) -> Self {
        Self {
            id: token.id.clone(),
            status: token.status,
            used_at: token.used_at,
        }
    }
}

/// Lazy, read-only view of a [`TokenStore`]. Rows are read as they are
/// iterated and [`TokenExport::iter`] may be called any number of times.
/// Holding the view blocks `generate` and `delete_unused`, so drop it
/// promptly.
#[derive(Debug)]
pub struct TokenExport<'a> {
    index: RwLockReadGuard<'a, Index>,
}

impl TokenExport<'_> {
    pub fn iter(&self) -> impl Iterator<Item = ExportRow> + '_ {
        self.index
            .order
            .iter()
            .filter_map(|id| self.index.slots.get(id))
            .map(|slot| ExportRow::from(&*slot.lock()))
    }

    pub fn len(&self) -> usize {
        self.index.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::{collection::hash_set, prop_assert, prop_assert_eq, proptest};
    use time::macros::datetime;

    fn store_with(ids: &[&str]) -> TokenStore {
        let store = TokenStore::default();
        store.provision(ids.iter().map(|id| TokenId::new(id)));
        store
    }

    #[test]
    fn test_random_token_id_is_well_formed() {
        for _ in 0..100 {
            let id = random_token_id();
            assert!(id.is_well_formed(), "{id}");
            assert_eq!(id, TokenId::new(id.as_str().to_ascii_lowercase()));
        }
    }

    #[test]
    fn test_generate_out_of_bounds() {
        let store = store_with(&["AAAAAA"]);

        for count in [0, DEFAULT_MAX_BATCH + 1] {
            assert_eq!(
                store.generate(count).unwrap_err(),
                Error::GenerationBoundsExceeded {
                    requested: count,
                    max: DEFAULT_MAX_BATCH,
                }
            );
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_generate_respects_configured_max() {
        let store = TokenStore::new(10);
        store.generate(10).unwrap();
        assert_eq!(
            store.generate(11).unwrap_err(),
            Error::GenerationBoundsExceeded {
                requested: 11,
                max: 10,
            }
        );
        assert_eq!(store.len(), 10);
    }

    #[test]
    fn test_generate_adds_active_tokens() {
        let store = TokenStore::default();
        let tokens = store.generate(25).unwrap();
        assert_eq!(tokens.len(), 25);
        assert_eq!(store.len(), 25);
        assert!(tokens.iter().all(Token::is_active));
        assert!(tokens.iter().all(|token| token.id.is_well_formed()));
    }

    #[test]
    fn test_generate_with_retries_collisions() {
        let existing = HashSet::from([TokenId::new("AAAAAA")]);
        let mut candidates = ["AAAAAA", "BBBBBB", "aaaaaa", "BBBBBB", "CCCCCC"]
            .into_iter()
            .map(TokenId::new);

        let tokens = generate_with(
            2,
            |id| existing.contains(id),
            DEFAULT_MAX_BATCH,
            datetime!(2024-07-20 08:00 UTC),
            || candidates.next().unwrap(),
        )
        .unwrap();

        assert_eq!(
            tokens.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec!["BBBBBB", "CCCCCC"]
        );
        assert!(tokens
            .iter()
            .all(|t| t.created_at == datetime!(2024-07-20 08:00 UTC)));
    }

    #[test]
    fn test_redeem() {
        let store = store_with(&["X7F3Q1"]);

        let token = store.redeem(&TokenId::new("x7f3q1")).unwrap();
        assert_eq!(token.status, TokenStatus::Used);
        let used_at = token.used_at.unwrap();
        assert!(used_at >= token.created_at);
        assert!(used_at <= OffsetDateTime::now_utc());

        assert_eq!(
            store.redeem(&TokenId::new("X7F3Q1")).unwrap_err(),
            Error::TokenAlreadyUsed(TokenId::new("X7F3Q1"))
        );
        assert_eq!(store.get(&TokenId::new("X7F3Q1")).unwrap().used_at, Some(used_at));
    }

    #[test]
    fn test_redeem_unknown() {
        let store = store_with(&["X7F3Q1"]);
        assert_eq!(
            store.redeem(&TokenId::new("ZZZZZZ")).unwrap_err(),
            Error::TokenNotFound(TokenId::new("ZZZZZZ"))
        );
    }

    #[test]
    fn test_redeem_never_predates_creation() {
        let mut token = Token::new(TokenId::new("AAAAAA"), datetime!(2024-07-20 08:00 UTC));
        let used_at = redeem_token(&mut token, datetime!(2024-07-20 07:59 UTC)).unwrap();
        assert_eq!(used_at, datetime!(2024-07-20 08:00 UTC));

        release_token(&mut token);
        assert_eq!(token, Token::new(TokenId::new("AAAAAA"), token.created_at));
    }

    #[test]
    fn test_delete_unused_keeps_used_tokens() {
        let store = store_with(&["AAAAAA", "BBBBBB", "CCCCCC"]);
        store.redeem(&TokenId::new("BBBBBB")).unwrap();

        assert_eq!(store.delete_unused(), 2);
        assert_eq!(store.delete_unused(), 0);

        let rows: Vec<ExportRow> = store.export().iter().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, TokenId::new("BBBBBB"));
        assert_eq!(rows[0].status, TokenStatus::Used);
    }

    #[test]
    fn test_export_is_ordered_and_restartable() {
        let store = store_with(&["CCCCCC", "AAAAAA", "BBBBBB"]);
        store.redeem(&TokenId::new("AAAAAA")).unwrap();

        let export = store.export();
        let first: Vec<ExportRow> = export.iter().collect();
        let second: Vec<ExportRow> = export.iter().collect();
        assert_eq!(first, second);
        assert_eq!(export.len(), 3);
        assert_eq!(
            first.iter().map(|row| row.id.as_str()).collect::<Vec<_>>(),
            vec!["CCCCCC", "AAAAAA", "BBBBBB"]
        );
        assert!(first[1].used_at.is_some());
        assert!(first[0].used_at.is_none());
        drop(export);

        assert_eq!(
            store.stats(),
            TokenStats {
                total: 3,
                used: 1,
                active: 2,
            }
        );
    }

    #[test]
    fn test_provision_skips_duplicates() {
        let store = store_with(&["AAAAAA"]);
        let added = store.provision([TokenId::new("aaaaaa"), TokenId::new("BBBBBB")]);
        assert_eq!(added.len(), 1);
        assert_eq!(store.len(), 2);
    }

    proptest! {
        #[test]
        fn test_generate_never_collides(
            existing in hash_set("[A-Z0-9]{6}", 0..200),
            count in 1_usize..300,
        ) {
            let existing: HashSet<TokenId> = existing.into_iter().map(TokenId::new).collect();
            let tokens = generate(count, |id| existing.contains(id), DEFAULT_MAX_BATCH).unwrap();

            prop_assert_eq!(tokens.len(), count);
            let ids: HashSet<&TokenId> = tokens.iter().map(|t| &t.id).collect();
            prop_assert_eq!(ids.len(), count);
            prop_assert!(ids.iter().all(|id| !existing.contains(*id)));
        }

        #[test]
        fn test_generate_with_small_id_space(count in 1_usize..20) {
            // Ids cycle through a space of 24, 4 of which are taken, so
            // every batch hits collisions and still comes back unique.
            let existing: HashSet<TokenId> =
                (0..4).map(|i| TokenId::new(format!("AAAA{i:02}"))).collect();
            let mut n = 0_usize;
            let tokens = generate_with(
                count,
                |id| existing.contains(id),
                DEFAULT_MAX_BATCH,
                OffsetDateTime::now_utc(),
                || {
                    n += 7;
                    TokenId::new(format!("AAAA{:02}", n % 24))
                },
            )
            .unwrap();

            let ids: HashSet<&TokenId> = tokens.iter().map(|t| &t.id).collect();
            prop_assert_eq!(ids.len(), count);
            prop_assert!(ids.iter().all(|id| !existing.contains(*id)));
        }
    }
}
