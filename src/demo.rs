//! Order fulfilment demo.
//!
//! Two definitions react to the same order stream: `fulfilment` tracks each
//! order by id, `loyalty` tracks each customer and awards points through a
//! late-bound [`PointsLedger`]. Outbound commands are answered by a simulated
//! warehouse and payment provider in [`respond`].

use crate::host::Host;
use corrflow_core::{
    ActionContext, BuildError, CancellationToken, CoreError, Envelope, MessageKind,
    WorkflowBuilder, WorkflowDefinition,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::type_name;

corrflow_core::workflow_state! {
    pub enum Fulfilment {
        Placed = 0,
        Reserved = 1,
        Paid = 2,
        Shipped = 3,
        Cancelled = 4,
    }
}

corrflow_core::workflow_state! {
    pub enum Membership {
        Member = 0,
    }
}

// Inbound events.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: String,
    pub customer_id: String,
    pub amount_cents: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReserved {
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCaptured {
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: String,
    pub tracking: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: String,
}

// Commands.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturePayment {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipOrder {
    pub order_id: String,
}

// Notifications.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub order_id: String,
    pub tracking: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderVoided {
    pub order_id: String,
}

pub struct FulfilmentFlow;

impl WorkflowDefinition for FulfilmentFlow {
    type State = Fulfilment;

    fn name() -> &'static str {
        "fulfilment"
    }

    fn configure(b: &mut WorkflowBuilder<Fulfilment>) -> Result<(), BuildError> {
        b.start_when::<OrderPlaced>(Fulfilment::Placed)?
            .send_command(|m: &OrderPlaced| ReserveStock {
                order_id: m.order_id.clone(),
            });

        b.on(Fulfilment::Placed)
            .when::<StockReserved>()?
            .send_command(|m: &StockReserved| CapturePayment {
                order_id: m.order_id.clone(),
            })
            .transition_to(Fulfilment::Reserved)?;

        b.on(Fulfilment::Placed)
            .when::<OrderCancelled>()?
            .publish_notification(|m: &OrderCancelled| OrderVoided {
                order_id: m.order_id.clone(),
            })
            .transition_to(Fulfilment::Cancelled)?;

        b.on(Fulfilment::Reserved)
            .when::<PaymentCaptured>()?
            .send_command(|m: &PaymentCaptured| ShipOrder {
                order_id: m.order_id.clone(),
            })
            .publish_notification(|m: &PaymentCaptured| OrderConfirmed {
                order_id: m.order_id.clone(),
            })
            .transition_to(Fulfilment::Paid)?;

        b.on(Fulfilment::Reserved)
            .when::<OrderCancelled>()?
            .send_command(|m: &OrderCancelled| ReleaseStock {
                order_id: m.order_id.clone(),
            })
            .publish_notification(|m: &OrderCancelled| OrderVoided {
                order_id: m.order_id.clone(),
            })
            .transition_to(Fulfilment::Cancelled)?;

        b.on(Fulfilment::Paid)
            .when::<OrderShipped>()?
            .publish_notification(|m: &OrderShipped| OrderCompleted {
                order_id: m.order_id.clone(),
                tracking: m.tracking.clone(),
            })
            .transition_to(Fulfilment::Shipped)?;

        b.correlate(|m: &OrderPlaced| m.order_id.clone())?;
        b.correlate(|m: &StockReserved| m.order_id.clone())?;
        b.correlate(|m: &PaymentCaptured| m.order_id.clone())?;
        b.correlate(|m: &OrderShipped| m.order_id.clone())?;
        b.correlate(|m: &OrderCancelled| m.order_id.clone())?;
        Ok(())
    }
}

/// Customer points balance.
pub trait PointsLedger: Send + Sync {
    /// Adds `points` and returns the new balance.
    fn award(&self, customer_id: &str, points: u64) -> u64;

    fn balance(&self, customer_id: &str) -> u64;
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    balances: DashMap<String, u64>,
}

impl PointsLedger for MemoryLedger {
    fn award(&self, customer_id: &str, points: u64) -> u64 {
        let mut balance = self.balances.entry(customer_id.to_string()).or_insert(0);
        *balance += points;
        *balance
    }

    fn balance(&self, customer_id: &str) -> u64 {
        self.balances.get(customer_id).map(|b| *b).unwrap_or(0)
    }
}

async fn award_points(ctx: ActionContext<OrderPlaced>) -> anyhow::Result<()> {
    let ledger = ctx.resolve::<dyn PointsLedger>()?;
    let order = ctx.message();
    let balance = ledger.award(&order.customer_id, order.amount_cents / 100);
    tracing::info!(
        "Customer {} earned points on {}, balance {}",
        order.customer_id,
        order.order_id,
        balance
    );
    Ok(())
}

pub struct LoyaltyFlow;

impl WorkflowDefinition for LoyaltyFlow {
    type State = Membership;

    fn name() -> &'static str {
        "loyalty"
    }

    fn configure(b: &mut WorkflowBuilder<Membership>) -> Result<(), BuildError> {
        b.start_when::<OrderPlaced>(Membership::Member)?
            .execute(award_points);

        b.on(Membership::Member)
            .when::<OrderPlaced>()?
            .execute(award_points);

        b.correlate(|m: &OrderPlaced| m.customer_id.clone())?;
        Ok(())
    }
}

/// Subscribes both demo definitions.
pub fn subscribe(host: &mut Host) -> Result<(), CoreError> {
    host.subscribe::<FulfilmentFlow, OrderPlaced>()?
        .subscribe::<FulfilmentFlow, StockReserved>()?
        .subscribe::<FulfilmentFlow, PaymentCaptured>()?
        .subscribe::<FulfilmentFlow, OrderShipped>()?
        .subscribe::<FulfilmentFlow, OrderCancelled>()?
        .subscribe::<LoyaltyFlow, OrderPlaced>()?;
    Ok(())
}

/// Plays the external systems: answers a committed command with the event
/// the warehouse or payment provider would send back.
///
/// Returns whether a reply was delivered.
pub async fn respond(
    host: &Host,
    envelope: &Envelope,
    cancel: &CancellationToken,
) -> Result<bool, CoreError> {
    if envelope.kind == MessageKind::Notification {
        tracing::info!("Published {}: {}", envelope.message_type, envelope.payload);
        return Ok(false);
    }

    let kind = envelope.message_type.as_str();
    if kind == type_name::<ReserveStock>() {
        let command: ReserveStock = envelope.decode()?;
        host.deliver(
            StockReserved {
                order_id: command.order_id,
            },
            cancel,
        )
        .await;
    } else if kind == type_name::<CapturePayment>() {
        let command: CapturePayment = envelope.decode()?;
        host.deliver(
            PaymentCaptured {
                order_id: command.order_id,
            },
            cancel,
        )
        .await;
    } else if kind == type_name::<ShipOrder>() {
        let command: ShipOrder = envelope.decode()?;
        let tracking = format!("TRK-{}", command.order_id);
        host.deliver(
            OrderShipped {
                order_id: command.order_id,
                tracking,
            },
            cancel,
        )
        .await;
    } else {
        tracing::info!("Sent {}: {}", envelope.message_type, envelope.payload);
        return Ok(false);
    }

    Ok(true)
}
