//! Integration tests for transaction assembly and execution
//!
//! Validates, end to end against the in-memory ledger:
//! - serialize / decode / decompile round trip of an assembled blueprint
//! - signer priority and missing-signature reporting
//! - durable nonce lifetimes (literal and fetched)
//! - event decoding of landed transactions
//! - stale-ledger-view retry, hooks and chained execution
//! - nonce-race and skip-preflight submission outcomes
//! - lookup-table compression through assembly and parsing

use futures::FutureExt;
use ledger_context_engine::compat;
use ledger_context_engine::config::ExecutionConfig;
use ledger_context_engine::context::{AccountContext, RawCodec};
use ledger_context_engine::errors::EngineError;
use ledger_context_engine::executor::{
    encode_event_instruction_data, event_authority, event_discriminator, BincodeEvent,
    ExecutionHook, PollingConfirmation, TransactionArgs, TransactionExecutor, TransactionResult,
};
use ledger_context_engine::graph::GraphNode;
use ledger_context_engine::runtime::{
    FetchedMeta, FetchedTransaction, InMemoryLedger, InnerInstructionSet, LedgerMethod,
    NonceConfig, RuntimeAccess, SignatureStatus, SimulationOutcome,
};
use ledger_context_engine::tx_builder::{
    AccountInput, BlueprintConfig, BlueprintOverrides, FeePayerSource, InstructionSource,
    InstructionSpec, KeypairSigner, Lifetime, LifetimeOverride, NonceSource, ResolveScope,
    SignerRef, SignerSource, SubmittingSigner, TransactionSigner,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, CompiledInstruction, Instruction},
    message::{v0, v0::LoadedAddresses, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    system_instruction, system_program,
    transaction::VersionedTransaction,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    ledger: Arc<InMemoryLedger>,
    runtime: Arc<RuntimeAccess>,
    payer: SignerRef,
    program: Pubkey,
}

impl Harness {
    fn new() -> Self {
        Self::with_execution(ExecutionConfig::default())
    }

    fn with_execution(execution: ExecutionConfig) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let runtime = RuntimeAccess::builder(ledger.clone())
            .execution_config(execution)
            .build()
            .unwrap();
        Self {
            ledger,
            runtime,
            payer: KeypairSigner::shared(Keypair::new()),
            program: Pubkey::new_unique(),
        }
    }

    fn deposit(&self) -> Instruction {
        Instruction::new_with_bytes(
            self.program,
            &[7, 1, 2, 3],
            vec![
                AccountMeta::new(self.payer.address(), true),
                AccountMeta::new(Pubkey::new_unique(), false),
                AccountMeta::new_readonly(Pubkey::new_unique(), false),
            ],
        )
    }

    fn executor(&self) -> TransactionExecutor<()> {
        TransactionExecutor::new(
            self.runtime.clone(),
            BlueprintConfig {
                label: "deposit".to_string(),
                instructions: vec![InstructionSource::literal(self.deposit())],
                fee_payer: Some(FeePayerSource::Signer(self.payer.clone())),
                ..Default::default()
            },
        )
    }
}

#[tokio::test(start_paused = true)]
async fn test_wire_round_trip_matches_blueprint() {
    let h = Harness::new();
    let executor = h.executor();

    let blueprint = executor.assemble((), BlueprintOverrides::default()).await.unwrap();
    let wire = executor
        .serialize((), BlueprintOverrides::default(), false)
        .await
        .unwrap();

    let decoded = compat::decode_wire_transaction(&wire).unwrap();
    let from_base64 =
        compat::decode_wire_transaction(compat::to_base64(&wire).as_bytes()).unwrap();
    assert_eq!(decoded, from_base64);

    assert_eq!(
        compat::get_static_account_keys(&decoded.message)[0],
        h.payer.address()
    );
    assert_eq!(
        *compat::get_recent_blockhash(&decoded.message),
        blueprint.lifetime.token()
    );
    let instructions =
        compat::decompile_message(&decoded.message, &LoadedAddresses::default()).unwrap();
    assert_eq!(instructions, blueprint.message_instructions());
    assert!(decoded.verify_with_results().iter().all(|ok| *ok));
}

#[tokio::test(start_paused = true)]
async fn test_assembly_is_repeatable() {
    let h = Harness::new();
    let executor = h.executor();

    let first = executor.assemble((), BlueprintOverrides::default()).await.unwrap();
    let second = executor.assemble((), BlueprintOverrides::default()).await.unwrap();
    assert_eq!(first.lifetime.token(), second.lifetime.token());
    assert_eq!(first.message_instructions(), second.message_instructions());
    assert_eq!(first.fee_payer, second.fee_payer);
    assert_eq!(h.ledger.calls(LedgerMethod::GetLatestBlockhash), 1);
}

#[tokio::test(start_paused = true)]
async fn test_override_signer_replaces_instruction_signer() {
    let h = Harness::new();
    let authority = KeypairSigner::new(Keypair::new());
    let attached: SignerRef = Arc::new(authority.clone());
    let preferred: SignerRef = Arc::new(authority);

    let executor = TransactionExecutor::<()>::new(
        h.runtime.clone(),
        BlueprintConfig {
            instructions: vec![InstructionSource::literal(InstructionSpec::new(
                h.program,
                vec![
                    AccountInput::signer(attached.clone(), true),
                    AccountInput::writable(Pubkey::new_unique()),
                ],
                vec![1],
            ))],
            fee_payer: Some(FeePayerSource::Signer(h.payer.clone())),
            ..Default::default()
        },
    );
    let overrides = BlueprintOverrides {
        signers: vec![SignerSource::Signer(preferred.clone())],
        ..Default::default()
    };

    let blueprint = executor.assemble((), overrides).await.unwrap();
    let matching: Vec<&SignerRef> = blueprint
        .signers
        .iter()
        .filter(|s| s.address() == preferred.address())
        .collect();
    assert_eq!(matching.len(), 1);
    assert!(Arc::ptr_eq(matching[0], &preferred));
    assert!(!Arc::ptr_eq(matching[0], &attached));
    assert_eq!(blueprint.signers.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fee_payer_without_signer_is_reported_missing() {
    let h = Harness::new();
    let absent = Pubkey::new_unique();
    let executor = TransactionExecutor::<()>::new(
        h.runtime.clone(),
        BlueprintConfig {
            instructions: vec![InstructionSource::literal(system_instruction::transfer(
                &absent,
                &Pubkey::new_unique(),
                1_000,
            ))],
            fee_payer: Some(FeePayerSource::Address(absent)),
            ..Default::default()
        },
    );

    match executor.serialize((), BlueprintOverrides::default(), false).await {
        Err(EngineError::MissingSignatures { addresses }) => assert_eq!(addresses, vec![absent]),
        other => panic!("expected missing signatures, got {other:?}"),
    }

    let partial = executor
        .serialize((), BlueprintOverrides::default(), true)
        .await
        .unwrap();
    let decoded = compat::decode_wire_transaction(&partial).unwrap();
    assert_eq!(decoded.signatures, vec![Signature::default()]);
}

#[tokio::test(start_paused = true)]
async fn test_owner_address_is_fee_payer_fallback() {
    let h = Harness::new();
    let owner_address = Pubkey::new_unique();
    let owner: Arc<dyn GraphNode> =
        AccountContext::new(h.runtime.clone(), "user", owner_address, RawCodec);
    let executor = TransactionExecutor::<()>::new(
        h.runtime.clone(),
        BlueprintConfig {
            instructions: vec![InstructionSource::literal(h.deposit())],
            ..Default::default()
        },
    )
    .with_owner(&owner);

    let blueprint = executor.assemble((), BlueprintOverrides::default()).await.unwrap();
    assert_eq!(blueprint.fee_payer, owner_address);

    let orphan = TransactionExecutor::<()>::new(h.runtime.clone(), BlueprintConfig::default());
    assert!(matches!(
        orphan.assemble((), BlueprintOverrides::default()).await,
        Err(EngineError::FeePayerUnresolved)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_literal_nonce_fetches_nothing() {
    let h = Harness::new();
    let nonce = NonceConfig {
        nonce_account: Pubkey::new_unique(),
        nonce_authority: h.payer.address(),
        nonce: Hash::new_unique(),
    };
    let overrides = BlueprintOverrides {
        lifetime: Some(LifetimeOverride::DurableNonce(NonceSource::Literal(nonce))),
        ..Default::default()
    };

    let blueprint = h.executor().assemble((), overrides).await.unwrap();
    assert_eq!(blueprint.lifetime, Lifetime::DurableNonce(nonce));
    assert_eq!(
        blueprint.message_instructions()[0],
        system_instruction::advance_nonce_account(&nonce.nonce_account, &h.payer.address())
    );
    assert_eq!(h.ledger.calls(LedgerMethod::GetAccount), 0);
    assert_eq!(h.ledger.calls(LedgerMethod::GetMultipleAccounts), 0);
    assert_eq!(h.ledger.calls(LedgerMethod::GetLatestBlockhash), 0);
}

#[tokio::test(start_paused = true)]
async fn test_nonce_account_is_read_at_assembly() {
    let h = Harness::new();
    let nonce_account = Pubkey::new_unique();
    let stored = Hash::new_unique();
    h.ledger.set_account(
        nonce_account,
        InMemoryLedger::nonce_account(&h.payer.address(), &stored),
    );
    let overrides = BlueprintOverrides {
        lifetime: Some(LifetimeOverride::DurableNonce(NonceSource::Account(
            nonce_account,
        ))),
        ..Default::default()
    };

    let blueprint = h.executor().assemble((), overrides).await.unwrap();
    assert_eq!(
        blueprint.lifetime,
        Lifetime::DurableNonce(NonceConfig {
            nonce_account,
            nonce_authority: h.payer.address(),
            nonce: stored,
        })
    );

    let missing = BlueprintOverrides {
        lifetime: Some(LifetimeOverride::DurableNonce(NonceSource::Account(
            Pubkey::new_unique(),
        ))),
        ..Default::default()
    };
    assert!(matches!(
        h.executor().assemble((), missing).await,
        Err(EngineError::NonceAccountUnresolved(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_inspection_lifetime_serializes_but_never_sends() {
    let h = Harness::new();
    let executor = h.executor();
    let inspect = || BlueprintOverrides {
        lifetime: Some(LifetimeOverride::Inspection),
        ..Default::default()
    };

    let wire = executor.serialize((), inspect(), false).await.unwrap();
    let decoded = compat::decode_wire_transaction(&wire).unwrap();
    assert_eq!(*compat::get_recent_blockhash(&decoded.message), Hash::default());

    assert!(matches!(
        executor.send((), inspect()).await,
        Err(EngineError::InvalidArguments(_))
    ));
    assert_eq!(h.ledger.calls(LedgerMethod::GetLatestBlockhash), 0);
    assert_eq!(h.ledger.calls(LedgerMethod::SendTransaction), 0);
}

#[tokio::test(start_paused = true)]
async fn test_simulation_failure_carries_logs() {
    let h = Harness::new();
    h.ledger.set_simulation(SimulationOutcome {
        err: Some("custom program error: 0x1771".to_string()),
        logs: vec!["Program log: Error: InsufficientFunds".to_string()],
        units_consumed: Some(4_200),
    });

    match h.executor().simulate((), BlueprintOverrides::default()).await {
        Err(EngineError::SimulationFailed { message, logs }) => {
            assert!(message.contains("0x1771"));
            assert_eq!(logs, vec!["Program log: Error: InsufficientFunds".to_string()]);
        }
        other => panic!("expected simulation failure, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_submitting_signer_sends_itself() {
    let h = Harness::new();
    let wallet = Keypair::new();
    let wallet_signer: SignerRef = Arc::new(SubmittingSigner::new(wallet, h.ledger.clone()));
    let executor = TransactionExecutor::<()>::new(
        h.runtime.clone(),
        BlueprintConfig {
            instructions: vec![InstructionSource::literal(system_instruction::transfer(
                &wallet_signer.address(),
                &Pubkey::new_unique(),
                10,
            ))],
            fee_payer: Some(FeePayerSource::Signer(wallet_signer.clone())),
            ..Default::default()
        },
    );

    let signature = executor.send((), BlueprintOverrides::default()).await.unwrap();
    let sent = h.ledger.sent_transactions();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].signatures[0], signature);
    assert!(sent[0].verify_with_results().iter().all(|ok| *ok));
}

#[tokio::test(start_paused = true)]
async fn test_send_and_confirm_polls_until_confirmed() {
    let ledger = Arc::new(InMemoryLedger::new());
    let runtime = RuntimeAccess::builder(ledger.clone())
        .confirmation(Arc::new(PollingConfirmation::new(
            Duration::from_millis(200),
            Duration::from_secs(10),
        )))
        .build()
        .unwrap();
    let payer = KeypairSigner::shared(Keypair::new());
    let executor = TransactionExecutor::<()>::new(
        runtime,
        BlueprintConfig {
            instructions: vec![InstructionSource::literal(system_instruction::transfer(
                &payer.address(),
                &Pubkey::new_unique(),
                10,
            ))],
            fee_payer: Some(FeePayerSource::Signer(payer)),
            ..Default::default()
        },
    );

    let signature = executor
        .send_and_confirm((), BlueprintOverrides::default())
        .await
        .unwrap();
    assert_eq!(ledger.sent_transactions()[0].signatures[0], signature);
    assert!(ledger.calls(LedgerMethod::GetSignatureStatuses) >= 1);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Deposited {
    user: Pubkey,
    amount: u64,
    minted: u64,
}

fn landed_with_events(h: &Harness, payloads: Vec<Vec<u8>>) -> Signature {
    let payer = h.payer.address();
    let authority = event_authority(&h.program);
    let ix = Instruction::new_with_bytes(
        h.program,
        &[9],
        vec![
            AccountMeta::new(payer, true),
            AccountMeta::new_readonly(authority, false),
        ],
    );
    let message = v0::Message::try_compile(&payer, &[ix], &[], Hash::new_unique()).unwrap();
    let index_of = |key: &Pubkey| message.account_keys.iter().position(|k| k == key).unwrap() as u8;
    let program_index = index_of(&h.program);
    let authority_index = index_of(&authority);

    let transaction = VersionedTransaction {
        signatures: vec![Signature::new_unique()],
        message: VersionedMessage::V0(message),
    };
    let signature = transaction.signatures[0];
    h.ledger.insert_transaction(
        signature,
        FetchedTransaction {
            slot: 42,
            transaction,
            meta: Some(FetchedMeta {
                fee: 5_000,
                log_messages: vec!["Program log: Instruction: Deposit".to_string()],
                inner_instructions: vec![InnerInstructionSet {
                    index: 0,
                    instructions: payloads
                        .into_iter()
                        .map(|data| {
                            CompiledInstruction::new_from_raw_parts(
                                program_index,
                                data,
                                vec![authority_index],
                            )
                        })
                        .collect(),
                }],
                ..FetchedMeta::default()
            }),
        },
    );
    signature
}

#[tokio::test(start_paused = true)]
async fn test_parse_decodes_registered_events() {
    let h = Harness::new();
    let event = Deposited {
        user: h.payer.address(),
        amount: 1_000_000_000,
        minted: 980_392_156,
    };
    let signature = landed_with_events(
        &h,
        vec![encode_event_instruction_data("Deposited", &event).unwrap()],
    );

    let executor = h
        .executor()
        .program(h.program)
        .event(BincodeEvent::<Deposited>::shared("Deposited"));
    let result = executor.parse(&signature).await.unwrap();

    assert!(result.succeeded);
    assert_eq!(result.slot, 42);
    assert_eq!(result.fee(), 5_000);
    assert_eq!(result.events_named("Deposited").len(), 1);
    assert_eq!(result.event::<Deposited>("Deposited").unwrap().unwrap(), event);
    assert!(result.unknown_events().is_empty());
    assert_eq!(result.instructions[0].program_id, h.program);
}

#[tokio::test(start_paused = true)]
async fn test_parse_keeps_unregistered_events_apart() {
    let h = Harness::new();
    let unknown = encode_event_instruction_data(
        "Withdrawn",
        &Deposited {
            user: Pubkey::new_unique(),
            amount: 1,
            minted: 1,
        },
    )
    .unwrap();
    let signature = landed_with_events(&h, vec![unknown]);

    let executor = h
        .executor()
        .program(h.program)
        .event(BincodeEvent::<Deposited>::shared("Deposited"));
    let result = executor.parse(&signature).await.unwrap();

    assert!(result.events_named("Deposited").is_empty());
    assert_eq!(result.unknown_events().len(), 1);
    assert_eq!(
        result.unknown_events()[0].discriminator,
        Some(event_discriminator("Withdrawn"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_stale_view_is_retried_once() {
    let h = Harness::with_execution(ExecutionConfig {
        max_retries: 1,
        ..Default::default()
    });
    h.ledger.fail_next(
        LedgerMethod::SendTransaction,
        EngineError::Rpc("Transaction simulation failed: Blockhash not found".into()),
    );

    let executor = h.executor().into_shared();
    let result = executor.execute((), BlueprintOverrides::default()).await.unwrap();

    assert!(result.succeeded);
    assert_eq!(h.ledger.calls(LedgerMethod::SendTransaction), 2);
    assert_eq!(h.runtime.metrics().retries.get(), 1);
    let sent = h.ledger.sent_transactions();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].signatures[0], result.signature);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_is_bounded() {
    let h = Harness::with_execution(ExecutionConfig {
        max_retries: 1,
        ..Default::default()
    });
    for _ in 0..2 {
        h.ledger.fail_next(
            LedgerMethod::SendTransaction,
            EngineError::Rpc("Blockhash not found".into()),
        );
    }

    let executor = h.executor().into_shared();
    let reported = executor
        .execute((), BlueprintOverrides::default())
        .await
        .unwrap_err();
    assert!(reported.error.is_stale_ledger_view());
    assert!(!reported.already_reported);
    assert_eq!(h.ledger.calls(LedgerMethod::SendTransaction), 2);
}

#[tokio::test(start_paused = true)]
async fn test_other_errors_are_not_retried() {
    let h = Harness::with_execution(ExecutionConfig {
        max_retries: 3,
        ..Default::default()
    });
    h.ledger.fail_next(
        LedgerMethod::SendTransaction,
        EngineError::Rpc("custom program error: 0x1".into()),
    );

    let executor = h.executor().into_shared();
    let reported = executor
        .execute((), BlueprintOverrides::default())
        .await
        .unwrap_err();
    assert_eq!(
        reported.error,
        EngineError::Rpc("custom program error: 0x1".into())
    );
    assert_eq!(h.ledger.calls(LedgerMethod::SendTransaction), 1);
    assert_eq!(h.runtime.metrics().retries.get(), 0);
}

struct Recorder {
    name: &'static str,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl ExecutionHook for Recorder {
    async fn on_signature(&self, _signature: &Signature) {
        self.seen.lock().push(format!("{}:signature", self.name));
    }

    async fn on_error(&self, error: &EngineError) {
        self.seen.lock().push(format!("{}:error:{}", self.name, error.category()));
    }

    async fn on_result(&self, result: &TransactionResult) {
        self.seen
            .lock()
            .push(format!("{}:result:{}", self.name, result.succeeded));
    }
}

#[tokio::test(start_paused = true)]
async fn test_hooks_observe_success_and_failure() {
    let h = Harness::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    h.runtime.update_globals(|globals| {
        globals.hooks = Some(Arc::new(Recorder {
            name: "global",
            seen: seen.clone(),
        }));
    });
    let executor = TransactionExecutor::<()>::new(
        h.runtime.clone(),
        BlueprintConfig {
            label: "deposit".to_string(),
            instructions: vec![InstructionSource::literal(h.deposit())],
            fee_payer: Some(FeePayerSource::Signer(h.payer.clone())),
            hooks: Some(Arc::new(Recorder {
                name: "template",
                seen: seen.clone(),
            })),
            ..Default::default()
        },
    )
    .into_shared();

    executor.execute((), BlueprintOverrides::default()).await.unwrap();
    assert_eq!(
        *seen.lock(),
        vec![
            "template:signature",
            "global:signature",
            "template:result:true",
            "global:result:true",
        ]
    );

    seen.lock().clear();
    h.ledger.fail_next(
        LedgerMethod::SendTransaction,
        EngineError::Rpc("custom program error: 0x1".into()),
    );
    let reported = executor
        .execute((), BlueprintOverrides::default())
        .await
        .unwrap_err();
    assert!(reported.already_reported);
    assert_eq!(*seen.lock(), vec!["template:error:rpc", "global:error:rpc"]);
}

#[tokio::test(start_paused = true)]
async fn test_landed_failure_is_a_result() {
    let h = Harness::new();
    h.ledger.set_execution_meta(FetchedMeta {
        err: Some("InstructionError(0, Custom(6001))".to_string()),
        log_messages: vec!["Program log: Error: Paused".to_string()],
        ..FetchedMeta::default()
    });

    let result = h
        .executor()
        .into_shared()
        .execute((), BlueprintOverrides::default())
        .await
        .unwrap();
    assert!(!result.succeeded);
    assert_eq!(h.runtime.metrics().transactions_failed.get(), 1);
}

#[derive(Debug, Clone, PartialEq)]
struct Step(u8);

impl TransactionArgs for Step {
    fn validate(&self) -> Result<(), EngineError> {
        if self.0 > 5 {
            return Err(EngineError::InvalidArguments(format!("step {} out of range", self.0)));
        }
        Ok(())
    }
}

fn stepped_executor(h: &Harness) -> Arc<TransactionExecutor<Step>> {
    let program = h.program;
    let payer = h.payer.clone();
    TransactionExecutor::new(
        h.runtime.clone(),
        BlueprintConfig {
            label: "rebalance".to_string(),
            instructions: vec![InstructionSource::resolver(move |scope: ResolveScope<Step>| {
                let payer = payer.clone();
                async move {
                    Ok::<_, EngineError>(vec![Some(InstructionSpec::new(
                        program,
                        vec![AccountInput::signer(payer, true)],
                        vec![scope.args.0],
                    ))])
                }
                .boxed()
            })],
            fee_payer: Some(FeePayerSource::Signer(h.payer.clone())),
            ..Default::default()
        },
    )
    .chain(|_result, args: Step| {
        async move { Ok::<_, EngineError>((args.0 < 2).then_some(Step(args.0 + 1))) }.boxed()
    })
    .into_shared()
}

#[tokio::test(start_paused = true)]
async fn test_chained_execution_runs_until_exhausted() {
    let h = Harness::new();
    let executor = stepped_executor(&h);

    let results = executor
        .execute_chained(Step(0), BlueprintOverrides::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    let steps: Vec<u8> = results.iter().map(|r| r.instructions[0].data[0]).collect();
    assert_eq!(steps, vec![0, 1, 2]);
    assert!(results[..2].iter().all(TransactionResult::has_next));
    assert!(!results[2].has_next());
    assert_eq!(h.ledger.sent_transactions().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_chain_stops_after_first_step() {
    let h = Harness::new();
    let executor = stepped_executor(&h);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let results = executor
        .execute_chained(Step(0), BlueprintOverrides::default(), cancel)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].has_next());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_arguments_never_reach_the_ledger() {
    let h = Harness::new();
    let executor = stepped_executor(&h);

    let reported = executor
        .execute(Step(9), BlueprintOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(reported.error, EngineError::InvalidArguments(_)));
    assert_eq!(h.ledger.calls(LedgerMethod::GetLatestBlockhash), 0);
    assert_eq!(h.ledger.calls(LedgerMethod::SendTransaction), 0);
}

#[test]
fn test_plain_instruction_carries_no_signers() {
    let transfer = system_instruction::transfer(&Pubkey::new_unique(), &Pubkey::new_unique(), 1);
    assert_eq!(transfer.program_id, system_program::id());
    let spec = InstructionSpec::from(transfer);
    let (_, signers) = spec.into_parts();
    assert!(signers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_nonce_race_checks_status_before_failing() {
    let h = Harness::new();
    let executor = h.executor();
    let overrides = BlueprintOverrides {
        lifetime: Some(LifetimeOverride::DurableNonce(NonceSource::Literal(NonceConfig {
            nonce_account: Pubkey::new_unique(),
            nonce_authority: h.payer.address(),
            nonce: Hash::new_unique(),
        }))),
        ..Default::default()
    };
    let signed = executor
        .assemble((), overrides.clone())
        .await
        .unwrap()
        .sign(false)
        .await
        .unwrap();
    let signature = signed.signatures[0];

    h.ledger.fail_next(
        LedgerMethod::SendTransaction,
        EngineError::NonceInvalid("Transaction nonce is invalid".into()),
    );
    assert!(matches!(
        executor.send_and_confirm((), overrides.clone()).await,
        Err(EngineError::NonceInvalid(_))
    ));

    h.ledger.set_signature_status(
        signature,
        SignatureStatus {
            slot: 7,
            err: None,
            confirmed: true,
        },
    );
    h.ledger.fail_next(
        LedgerMethod::SendTransaction,
        EngineError::NonceInvalid("Transaction nonce is invalid".into()),
    );
    assert_eq!(
        executor.send_and_confirm((), overrides).await.unwrap(),
        signature
    );
    assert!(h.ledger.sent_transactions().is_empty());
    assert_eq!(h.ledger.calls(LedgerMethod::GetSignatureStatuses), 2);
}

#[tokio::test(start_paused = true)]
async fn test_skip_preflight_returns_best_effort_signature() {
    let h = Harness::new();
    let executor = h.executor();
    let rejected = || EngineError::SimulationFailed {
        message: "Transaction simulation failed: custom program error: 0x1".into(),
        logs: vec!["Program log: Error: Paused".into()],
    };

    h.ledger.fail_next(LedgerMethod::SendTransaction, rejected());
    assert!(matches!(
        executor
            .send_and_confirm((), BlueprintOverrides::default())
            .await,
        Err(EngineError::SimulationFailed { .. })
    ));

    let expected = executor
        .assemble((), BlueprintOverrides::default())
        .await
        .unwrap()
        .sign(false)
        .await
        .unwrap()
        .signatures[0];
    h.ledger.fail_next(LedgerMethod::SendTransaction, rejected());
    let signature = executor
        .send_and_confirm(
            (),
            BlueprintOverrides {
                skip_preflight: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(signature, expected);
}

#[tokio::test(start_paused = true)]
async fn test_lookup_tables_compress_and_resolve() {
    let h = Harness::new();
    let vault = Pubkey::new_unique();
    let oracle = Pubkey::new_unique();
    let table = Pubkey::new_unique();
    h.ledger
        .set_account(table, InMemoryLedger::lookup_table_account(&[vault, oracle]));
    h.ledger.set_execution_meta(FetchedMeta {
        log_messages: vec!["Program log: Instruction: Deposit".to_string()],
        ..FetchedMeta::default()
    });

    let deposit = Instruction::new_with_bytes(
        h.program,
        &[7],
        vec![
            AccountMeta::new(h.payer.address(), true),
            AccountMeta::new(vault, false),
            AccountMeta::new_readonly(oracle, false),
        ],
    );
    let executor = TransactionExecutor::<()>::new(
        h.runtime.clone(),
        BlueprintConfig {
            instructions: vec![InstructionSource::literal(deposit.clone())],
            fee_payer: Some(FeePayerSource::Signer(h.payer.clone())),
            address_lookup_tables: vec![table],
            ..Default::default()
        },
    );
    let overrides = || BlueprintOverrides {
        address_lookup_tables: vec![table, table],
        ..Default::default()
    };

    let blueprint = executor.assemble((), overrides()).await.unwrap();
    assert_eq!(blueprint.address_lookup_tables.len(), 1);
    assert_eq!(blueprint.address_lookup_tables[0].key, table);

    let VersionedMessage::V0(message) = blueprint.compile().unwrap() else {
        panic!("expected a v0 message");
    };
    assert!(!message.account_keys.contains(&vault));
    assert!(!message.account_keys.contains(&oracle));
    assert_eq!(message.address_table_lookups.len(), 1);
    assert_eq!(message.address_table_lookups[0].account_key, table);
    assert_eq!(message.address_table_lookups[0].writable_indexes, vec![0]);
    assert_eq!(message.address_table_lookups[0].readonly_indexes, vec![1]);

    let signature = executor.send((), overrides()).await.unwrap();
    let result = executor.parse(&signature).await.unwrap();
    assert!(result.meta.loaded_addresses.is_none());
    assert_eq!(result.instructions, vec![deposit]);
}
