//! Order processing demo showing happy and unhappy paths.
//!
//! Run with: cargo run --example demo

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use stepchain::{Chain, Completion, ExceptionFilter, ExecuteOptions, Step, StepResult};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Context and Error types
// ============================================================================

#[derive(Debug, Clone, Default)]
struct OrderContext {
    customer: String,
    quantity: u32,
    amount: f64,
    order_id: Option<String>,
    payment_id: Option<String>,
    inventory_reserved: bool,
    status_polls: u32,
}

#[derive(Debug, Clone, Error)]
enum OrderError {
    #[error("Payment gateway timeout")]
    GatewayTimeout,
    #[error("Card declined")]
    CardDeclined,
    #[error("Inventory unavailable")]
    InventoryUnavailable,
}

// ============================================================================
// Step implementations
// ============================================================================

/// Create order record.
struct CreateOrder;

#[async_trait]
impl Step<OrderContext> for CreateOrder {
    async fn execute(&self, mut ctx: OrderContext, _token: CancellationToken) -> StepResult<OrderContext> {
        println!("  [CreateOrder] Creating order for customer: {}", ctx.customer);
        tokio::time::sleep(Duration::from_millis(100)).await;

        ctx.order_id = Some(format!("ORD-{}-001", ctx.customer));
        println!("  [CreateOrder] Order created: {:?}", ctx.order_id);
        Ok(ctx)
    }
}

/// Reserve inventory.
struct ReserveInventory;

#[async_trait]
impl Step<OrderContext> for ReserveInventory {
    async fn execute(&self, mut ctx: OrderContext, _token: CancellationToken) -> StepResult<OrderContext> {
        println!("  [ReserveInventory] Reserving {} items...", ctx.quantity);
        tokio::time::sleep(Duration::from_millis(150)).await;

        if ctx.quantity > 100 {
            println!("  [ReserveInventory] FAILED - Not enough inventory!");
            return Err(OrderError::InventoryUnavailable.into());
        }

        ctx.inventory_reserved = true;
        println!("  [ReserveInventory] Reserved {} items", ctx.quantity);
        Ok(ctx)
    }
}

// Track payment attempts for demo
static PAYMENT_ATTEMPTS: AtomicU32 = AtomicU32::new(0);

/// Process payment; the first two attempts time out when `flaky` is set.
#[derive(Clone)]
struct ProcessPayment {
    flaky: bool,
    declined: bool,
}

#[async_trait]
impl Step<OrderContext> for ProcessPayment {
    async fn execute(&self, mut ctx: OrderContext, _token: CancellationToken) -> StepResult<OrderContext> {
        let attempt = PAYMENT_ATTEMPTS.fetch_add(1, Ordering::SeqCst) + 1;
        println!(
            "  [ProcessPayment] Attempt {} - Processing ${:.2}...",
            attempt, ctx.amount
        );
        tokio::time::sleep(Duration::from_millis(200)).await;

        if self.flaky && attempt < 3 {
            println!("  [ProcessPayment] TRANSIENT FAILURE - Will retry...");
            return Err(OrderError::GatewayTimeout.into());
        }

        if self.declined {
            println!("  [ProcessPayment] PERMANENT FAILURE - Card declined!");
            return Err(OrderError::CardDeclined.into());
        }

        ctx.payment_id = Some(format!("PAY-{}", uuid::Uuid::new_v4()));
        println!("  [ProcessPayment] Payment successful: {:?}", ctx.payment_id);
        Ok(ctx)
    }
}

// ============================================================================
// Chain definition
// ============================================================================

fn order_chain(ctx: OrderContext, payment: ProcessPayment, token: CancellationToken) -> Chain<OrderContext> {
    let retry = ExceptionFilter::filter(|e: &OrderError| matches!(e, OrderError::GatewayTimeout))
        .intervals([Duration::from_millis(100), Duration::from_millis(200)]);

    let mut chain = Chain::new(ctx, token);
    chain
        .step(CreateOrder, ExecuteOptions::None)
        .step(ReserveInventory, ExecuteOptions::None)
        .retry(retry, move |attempt| {
            attempt.step(payment.clone(), ExecuteOptions::None);
        })
        .compensate(|c| {
            println!("  [Compensate] {} - rolling back order", c.fault());
            let fault = c.fault().clone();
            c.task_async(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                println!("  [Compensate] Inventory released, payment refunded");
                Err(fault)
            })
        })
        .finally(
            |ctx, status| {
                println!("  [Finally] Order {:?} finished as {:?}", ctx.order_id, status);
                Ok(())
            },
            ExecuteOptions::None,
        );
    chain
}

// ============================================================================
// Demo scenarios
// ============================================================================

#[tokio::main]
async fn main() {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║           Stepchain Order Demo                               ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    // Scenario 1: Happy path - everything works
    run_scenario(
        "Scenario 1: Happy Path - All steps succeed",
        order("CUST-123", 5, 99.99),
        ProcessPayment { flaky: false, declined: false },
    )
    .await;

    // Scenario 2: Unhappy path - inventory failure triggers compensation
    run_scenario(
        "Scenario 2: Inventory Failure - Triggers compensation",
        order("CUST-456", 999, 999.99),
        ProcessPayment { flaky: false, declined: false },
    )
    .await;

    // Scenario 3: Payment with transient failures (retries succeed)
    PAYMENT_ATTEMPTS.store(0, Ordering::SeqCst);
    run_scenario(
        "Scenario 3: Payment Retry - Transient failures, then success",
        order("CUST-789", 3, 49.99),
        ProcessPayment { flaky: true, declined: false },
    )
    .await;

    // Scenario 4: Declined cards are not retried
    PAYMENT_ATTEMPTS.store(0, Ordering::SeqCst);
    run_scenario(
        "Scenario 4: Card Declined - No retry, order rolled back",
        order("CUST-000", 10, 199.99),
        ProcessPayment { flaky: false, declined: true },
    )
    .await;

    // Scenario 5: Poll shipment status until told to stop
    run_status_polling().await;

    println!("\n✓ All demos completed!");
}

fn order(customer: &str, quantity: u32, amount: f64) -> OrderContext {
    OrderContext {
        customer: customer.to_string(),
        quantity,
        amount,
        ..OrderContext::default()
    }
}

async fn run_scenario(title: &str, ctx: OrderContext, payment: ProcessPayment) {
    println!("┌──────────────────────────────────────────────────────────────┐");
    println!("│ {:<61}│", title);
    println!("└──────────────────────────────────────────────────────────────┘\n");

    match order_chain(ctx, payment, CancellationToken::new()).await {
        Completion::Succeeded(ctx) => {
            println!("\n  ✓ Order completed: {:?}\n", ctx);
        }
        Completion::Faulted(fault) => {
            println!("\n  ✗ Order failed: {}\n", fault);
        }
        Completion::Canceled => {
            println!("\n  ✗ Order canceled\n");
        }
    }
}

async fn run_status_polling() {
    println!("┌──────────────────────────────────────────────────────────────┐");
    println!("│ Scenario 5: Status Polling - Repeat until stopped            │");
    println!("└──────────────────────────────────────────────────────────────┘\n");

    let stop = CancellationToken::new();
    let trigger = stop.clone();

    let mut chain = Chain::new(order("CUST-321", 1, 9.99), CancellationToken::new());
    chain.repeat(Duration::from_millis(100), stop, move |poll| {
        let trigger = trigger.clone();
        poll.execute(
            move |ctx| {
                ctx.status_polls += 1;
                println!("  [PollStatus] Poll #{}", ctx.status_polls);
                if ctx.status_polls == 3 {
                    println!("  [PollStatus] Shipment delivered, stopping");
                    trigger.cancel();
                }
                Ok(())
            },
            ExecuteOptions::None,
        );
    });

    match chain.await.into_result() {
        Ok(ctx) => println!("\n  ✓ Polled {} times\n", ctx.status_polls),
        Err(err) => println!("\n  ✗ Polling failed: {}\n", err),
    }
}
