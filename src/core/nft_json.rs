//! nftables backend
//!
//! [`NftEngine`] keeps the staged object set in memory and, on commit,
//! renders all of it into one JSON batch for `nft -j -f -`:
//!
//! ```text
//! add table inet vpnfw; delete table inet vpnfw; add table inet vpnfw
//! add chain ...; add rule ...
//! ```
//!
//! nft applies a batch atomically, so the old table stays in force until the
//! new one replaces it whole.
//!
//! # Mapping
//!
//! - each sublayer becomes two base chains, `<sublayer>_out` (hook output)
//!   and `<sublayer>_in` (hook input), policy accept
//! - filters are ordered by weight, highest first, Block before Permit on a
//!   tie; the first matching rule in a chain decides for that chain and a
//!   drop in any chain is final
//! - conntrack only short-circuits reply-direction packets and related ICMP
//!   errors; original-direction packets of open flows go through the rules
//!   again, so a transition also cuts flows the new policy does not permit
//! - same-field conditions become anonymous sets
//! - application conditions cannot be expressed and are rejected on add

use crate::core::condition::{AddressFamily, Condition, ConditionField, MatchType, Protocol};
use crate::core::engine::{EngineObject, FilterEngine, TransactionHandle};
use crate::core::error::EngineError;
use crate::core::filter::{Action, Direction, FilterSpec, Layer, ObjectKind, Sublayer};
use crate::core::identity::StableId;
use ipnetwork::IpNetwork;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Output, Stdio};
use strum::IntoEnumIterator;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TABLE: &str = "vpnfw";

type ObjectMap = BTreeMap<(ObjectKind, StableId), EngineObject>;

/// Spawns `command`, feeds `input` on stdin and collects the output
pub(crate) fn run_with_stdin(mut command: Command, input: &[u8]) -> Result<Output, EngineError> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            error!("Failed to spawn nft: {e}");
            EngineError::Nftables {
                message: format!("Failed to spawn nft: {e}"),
                stderr: None,
                exit_code: None,
            }
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input)?;
    }
    Ok(child.wait_with_output()?)
}

/// Computes SHA-256 checksum of a JSON value
pub fn compute_checksum(batch: &Value) -> String {
    let json_str = serde_json::to_string(batch).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json_str.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn match_expr(left: Value, op: &str, right: Value) -> Value {
    json!({ "match": { "left": left, "op": op, "right": right } })
}

fn one_or_set(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        json!({ "set": values })
    }
}

fn network_value(network: &IpNetwork) -> Value {
    let host_prefix = match AddressFamily::of_network(network) {
        AddressFamily::Ipv4 => 32,
        AddressFamily::Ipv6 => 128,
    };
    if network.prefix() == host_prefix {
        json!(network.ip().to_string())
    } else {
        json!({ "prefix": { "addr": network.network().to_string(), "len": network.prefix() } })
    }
}

const fn nfproto(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::Ipv4 => "ipv4",
        AddressFamily::Ipv6 => "ipv6",
    }
}

const fn ip_payload(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::Ipv4 => "ip",
        AddressFamily::Ipv6 => "ip6",
    }
}

const fn icmp_payload(family: AddressFamily) -> (&'static str, &'static str) {
    match family {
        AddressFamily::Ipv4 => ("icmp", "icmp"),
        AddressFamily::Ipv6 => ("ipv6-icmp", "icmpv6"),
    }
}

fn direction_chain(sublayer: Sublayer, direction: Direction) -> String {
    match direction {
        Direction::Outbound => format!("{sublayer}_out"),
        Direction::Inbound => format!("{sublayer}_in"),
    }
}

/// Chain holding the filters of `layer` in `sublayer`
pub fn chain_name(sublayer: Sublayer, layer: Layer) -> String {
    direction_chain(sublayer, layer.direction())
}

fn rejected(filter: &FilterSpec, reason: impl Into<String>) -> EngineError {
    EngineError::Rejected {
        kind: ObjectKind::Filter,
        id: filter.id,
        reason: reason.into(),
    }
}

/// Translates one filter into nft match expressions followed by its verdict
pub fn rule_expressions(filter: &FilterSpec) -> Result<Vec<Value>, EngineError> {
    let family = filter.layer.family();
    let outbound = filter.layer.direction() == Direction::Outbound;
    let (local_addr, remote_addr) = if outbound { ("saddr", "daddr") } else { ("daddr", "saddr") };
    let (local_port, remote_port) = if outbound { ("sport", "dport") } else { ("dport", "sport") };
    let if_key = if outbound { "oifname" } else { "iifname" };

    let mut groups: BTreeMap<ConditionField, Vec<&Condition>> = BTreeMap::new();
    for condition in &filter.conditions {
        groups.entry(condition.field()).or_default().push(condition);
    }

    let mut expr = vec![match_expr(
        json!({ "meta": { "key": "nfproto" } }),
        "==",
        json!(nfproto(family)),
    )];

    if filter.layer.is_icmp_error() {
        expr.push(match_expr(
            json!({ "meta": { "key": "l4proto" } }),
            "==",
            json!(icmp_payload(family).0),
        ));
    }

    let has_ports = groups.contains_key(&ConditionField::LocalPort)
        || groups.contains_key(&ConditionField::RemotePort);
    if has_ports && !groups.contains_key(&ConditionField::Protocol) {
        // th ports are only meaningful for transports that carry them
        expr.push(match_expr(
            json!({ "meta": { "key": "l4proto" } }),
            "==",
            json!({ "set": [Protocol::Tcp.to_string(), Protocol::Udp.to_string()] }),
        ));
    }

    for (field, conditions) in &groups {
        let mut values = Vec::with_capacity(conditions.len());
        let mut polarity: Option<MatchType> = None;

        for condition in conditions {
            let (value, match_type) = match condition {
                Condition::Protocol(p) => (json!(p.to_string()), MatchType::Equal),
                Condition::PortLocal(port) | Condition::PortRemote(port) => {
                    (json!(port), MatchType::Equal)
                }
                Condition::IpLocal(net) | Condition::IpRemote(net) => {
                    (network_value(net), MatchType::Equal)
                }
                Condition::InterfaceAlias { alias, match_type } => (json!(alias), *match_type),
                Condition::Loopback(match_type) => (json!("lo"), *match_type),
                Condition::IcmpError(class) => (json!(class.to_string()), MatchType::Equal),
                Condition::Application(path) => {
                    return Err(rejected(
                        filter,
                        format!(
                            "nftables cannot match on application path {}",
                            path.display()
                        ),
                    ));
                }
            };
            if polarity.is_some_and(|p| p != match_type) {
                return Err(rejected(filter, format!("mixed polarity in {field} conditions")));
            }
            polarity = Some(match_type);
            values.push(value);
        }

        let op = match polarity.unwrap_or_default() {
            MatchType::Equal => "==",
            MatchType::NotEqual if values.len() == 1 => "!=",
            MatchType::NotEqual => {
                return Err(rejected(
                    filter,
                    format!("several negated {field} conditions always match"),
                ));
            }
        };

        let left = match field {
            ConditionField::Protocol => json!({ "meta": { "key": "l4proto" } }),
            ConditionField::LocalPort => json!({ "payload": { "protocol": "th", "field": local_port } }),
            ConditionField::RemotePort => {
                json!({ "payload": { "protocol": "th", "field": remote_port } })
            }
            ConditionField::LocalAddress => {
                json!({ "payload": { "protocol": ip_payload(family), "field": local_addr } })
            }
            ConditionField::RemoteAddress => {
                json!({ "payload": { "protocol": ip_payload(family), "field": remote_addr } })
            }
            ConditionField::Interface | ConditionField::Loopback => {
                json!({ "meta": { "key": if_key } })
            }
            ConditionField::IcmpType => {
                json!({ "payload": { "protocol": icmp_payload(family).1, "field": "type" } })
            }
            ConditionField::Application => {
                return Err(rejected(filter, "application conditions are not supported"));
            }
        };
        expr.push(match_expr(left, op, one_or_set(values)));
    }

    expr.push(match filter.action {
        Action::Permit => json!({ "accept": null }),
        Action::Block => json!({ "drop": null }),
    });
    Ok(expr)
}

const fn chain_priority(sublayer: Sublayer) -> i32 {
    match sublayer {
        Sublayer::Baseline => -10,
        Sublayer::Dns => -9,
    }
}

pub const REPLY_RULE_COMMENT: &str = "allow replies";
pub const RELATED_ICMP_RULE_COMMENT: &str = "allow related ICMP errors";

/// Conntrack rules placed ahead of the filters of a chain
fn tracking_rules(direction: Direction) -> Vec<(&'static str, Vec<Value>)> {
    let ct = |key: &str| json!({ "ct": { "key": key } });
    let reply = (
        REPLY_RULE_COMMENT,
        vec![
            match_expr(ct("direction"), "==", json!("reply")),
            match_expr(ct("state"), "==", json!(["established"])),
            json!({ "accept": null }),
        ],
    );
    match direction {
        Direction::Outbound => vec![reply],
        Direction::Inbound => vec![
            reply,
            (
                RELATED_ICMP_RULE_COMMENT,
                vec![
                    match_expr(ct("state"), "==", json!(["related"])),
                    match_expr(
                        json!({ "meta": { "key": "l4proto" } }),
                        "==",
                        json!({ "set": ["icmp", "ipv6-icmp"] }),
                    ),
                    json!({ "accept": null }),
                ],
            ),
        ],
    }
}

/// Renders `objects` as a complete nft batch replacing `table`.
///
/// Without a provider object the batch only removes the table.
pub fn render_batch<'a>(
    table: &str,
    objects: impl IntoIterator<Item = &'a EngineObject>,
) -> Result<Value, EngineError> {
    let mut has_provider = false;
    let mut sublayers = Vec::new();
    let mut filters: Vec<&FilterSpec> = Vec::new();
    for object in objects {
        match object {
            EngineObject::Provider(_) => has_provider = true,
            EngineObject::Sublayer(spec) => {
                if let Some(sublayer) = Sublayer::iter().find(|s| s.identity() == spec.id) {
                    sublayers.push(sublayer);
                }
            }
            EngineObject::Filter(spec) => filters.push(spec),
        }
    }

    let table_obj = json!({ "family": "inet", "name": table });
    let mut batch = vec![
        json!({ "add": { "table": table_obj } }),
        json!({ "delete": { "table": table_obj } }),
    ];
    if !has_provider {
        return Ok(json!({ "nftables": batch }));
    }
    batch.push(json!({ "add": { "table": table_obj } }));

    sublayers.sort();
    for sublayer in &sublayers {
        for (direction, hook) in [(Direction::Outbound, "output"), (Direction::Inbound, "input")] {
            let chain = direction_chain(*sublayer, direction);
            batch.push(json!({
                "add": {
                    "chain": {
                        "family": "inet",
                        "table": table,
                        "name": chain,
                        "type": "filter",
                        "hook": hook,
                        "prio": chain_priority(*sublayer),
                        "policy": "accept"
                    }
                }
            }));
            for (comment, expr) in tracking_rules(direction) {
                batch.push(json!({
                    "add": {
                        "rule": {
                            "family": "inet",
                            "table": table,
                            "chain": chain,
                            "expr": expr,
                            "comment": comment
                        }
                    }
                }));
            }
        }
    }

    // stable sort keeps object order among equals
    filters.sort_by_key(|f| (std::cmp::Reverse(f.weight), f.action != Action::Block));
    for filter in filters {
        if !sublayers.contains(&filter.sublayer) {
            return Err(EngineError::NotFound {
                kind: ObjectKind::Sublayer,
                id: filter.sublayer.identity(),
            });
        }
        batch.push(json!({
            "add": {
                "rule": {
                    "family": "inet",
                    "table": table,
                    "chain": chain_name(filter.sublayer, filter.layer),
                    "expr": rule_expressions(filter)?,
                    "comment": filter.name
                }
            }
        }));
    }

    Ok(json!({ "nftables": batch }))
}

/// Filter engine backed by an nftables table
#[derive(Debug)]
pub struct NftEngine {
    table: String,
    committed: ObjectMap,
    open: Option<(TransactionHandle, ObjectMap)>,
    next_handle: u64,
    verify_before_commit: bool,
    command: Option<Vec<String>>,
    last_checksum: Option<String>,
}

impl Default for NftEngine {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE)
    }
}

impl NftEngine {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            committed: ObjectMap::new(),
            open: None,
            next_handle: 0,
            verify_before_commit: true,
            command: None,
            last_checksum: None,
        }
    }

    /// Runs `nft --check` on every batch before applying it
    #[must_use]
    pub fn verify_before_commit(mut self, verify: bool) -> Self {
        self.verify_before_commit = verify;
        self
    }

    /// Uses `argv` instead of the (elevated) `nft` command
    #[must_use]
    pub fn with_command(mut self, argv: Vec<String>) -> Self {
        self.command = Some(argv);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// SHA-256 of the last batch nft accepted
    pub fn last_checksum(&self) -> Option<&str> {
        self.last_checksum.as_deref()
    }

    /// Batch for the currently committed objects
    pub fn render_committed(&self) -> Result<Value, EngineError> {
        render_batch(&self.table, self.committed.values())
    }

    fn nft_command(&self, args: &[&str]) -> Result<Command, EngineError> {
        match &self.command {
            Some(argv) => {
                let (program, rest) = argv.split_first().ok_or_else(|| EngineError::Nftables {
                    message: "empty nft command".to_string(),
                    stderr: None,
                    exit_code: None,
                })?;
                let mut cmd = Command::new(program);
                cmd.args(rest).args(args);
                Ok(cmd)
            }
            None => crate::elevation::create_elevated_nft_command(args).map_err(|e| {
                EngineError::Nftables {
                    message: e.to_string(),
                    stderr: None,
                    exit_code: None,
                }
            }),
        }
    }

    fn apply_batch(&mut self, batch: &Value) -> Result<(), EngineError> {
        if self.verify_before_commit {
            let check = self.nft_command(&["--json", "--check", "-f", "-"])?;
            let result = crate::core::verify::verify_ruleset(check, batch)?;
            if !result.success {
                return Err(EngineError::Nftables {
                    message: result.errors.join("; "),
                    stderr: None,
                    exit_code: None,
                });
            }
        }

        let json_string = serde_json::to_string(batch).map_err(|e| EngineError::Nftables {
            message: format!("Failed to serialize batch: {e}"),
            stderr: None,
            exit_code: None,
        })?;
        let apply = self.nft_command(&["--json", "-f", "-"])?;
        let output = run_with_stdin(apply, json_string.as_bytes())?;

        if output.status.success() {
            self.last_checksum = Some(compute_checksum(batch));
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            error!("nft batch failed: {stderr}");
            Err(EngineError::Nftables {
                message: crate::core::error::NftErrorPattern::match_error(&stderr).user_message,
                stderr: Some(stderr),
                exit_code: output.status.code(),
            })
        }
    }

    fn staged_mut(&mut self) -> Result<&mut ObjectMap, EngineError> {
        self.open
            .as_mut()
            .map(|(_, staged)| staged)
            .ok_or(EngineError::NoTransaction)
    }

    fn check_handle(&self, handle: TransactionHandle) -> Result<(), EngineError> {
        match &self.open {
            None => Err(EngineError::NoTransaction),
            Some((open, _)) if *open != handle => Err(EngineError::UnknownTransaction(handle)),
            Some(_) => Ok(()),
        }
    }
}

impl FilterEngine for NftEngine {
    fn begin_transaction(&mut self) -> Result<TransactionHandle, EngineError> {
        if self.open.is_some() {
            return Err(EngineError::TransactionInProgress);
        }
        self.next_handle += 1;
        let handle = TransactionHandle::new(self.next_handle);
        self.open = Some((handle, self.committed.clone()));
        debug!("nft: begin {handle}");
        Ok(handle)
    }

    fn add_object(&mut self, object: &EngineObject) -> Result<(), EngineError> {
        // fail on the add, not at commit, so the caller learns which object
        if let Some(filter) = object.as_filter() {
            rule_expressions(filter)?;
        }
        let staged = self.staged_mut()?;
        let key = (object.kind(), object.id());
        if staged.contains_key(&key) {
            return Err(EngineError::AlreadyExists {
                kind: key.0,
                id: key.1,
            });
        }
        staged.insert(key, object.clone());
        Ok(())
    }

    fn delete_object(&mut self, kind: ObjectKind, id: StableId) -> Result<(), EngineError> {
        let staged = self.staged_mut()?;
        staged
            .remove(&(kind, id))
            .map(|_| ())
            .ok_or(EngineError::NotFound { kind, id })
    }

    fn commit(&mut self, handle: TransactionHandle) -> Result<(), EngineError> {
        self.check_handle(handle)?;
        let Some((_, staged)) = &self.open else {
            return Err(EngineError::NoTransaction);
        };
        let batch = render_batch(&self.table, staged.values())?;
        let count = batch["nftables"].as_array().map_or(0, Vec::len);

        self.apply_batch(&batch)?;
        if let Some((_, staged)) = self.open.take() {
            self.committed = staged;
        }
        info!(
            "nft: committed {handle} to table inet {} ({count} batch commands)",
            self.table
        );
        Ok(())
    }

    fn abort(&mut self, handle: TransactionHandle) {
        if self.check_handle(handle).is_ok() {
            self.open = None;
            warn!("nft: aborted {handle}, table inet {} unchanged", self.table);
        }
    }

    fn supports_application_conditions(&self) -> bool {
        false
    }
}
