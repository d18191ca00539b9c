//! End-to-end tests for the collection pipeline.
//!
//! Service → dispatcher → event store → projections, all in memory.
//!
//! Verifies:
//! - route planning order and statistics for a day of collection
//! - route statistics recomputed from task state
//! - locationless tasks kept on the route but not sequenced
//! - failed follow-ups reported without undoing the task transition
//! - tenant isolation across every entry point

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use fieldcollect_collections::{
        CollectionTask, FieldCollectorId, PaymentMethod, RouteStatus, TaskId, TaskStatus,
    };
    use fieldcollect_core::{TenantId, UserId};
    use fieldcollect_events::EventBus;
    use fieldcollect_geo::GeoPoint;
    use fieldcollect_invoicing::{CustomerId, InvoiceStatus};
    use fieldcollect_routing::OptimizerSettings;

    use crate::command_dispatcher::DispatchError;
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::ports::{CustomerSite, InvoiceLedger, PaymentReceipt, PortError};
    use crate::projections::OutstandingInvoice;
    use crate::service::{
        AssignTasksRequest, CollectRequest, CollectionService, InMemoryBus, InMemoryCollectionService,
        IssueInvoiceRequest, OptimizeRouteRequest, ReconciliationIssue, RegisterCollectorRequest,
        ServiceError,
    };

    fn point(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint::new(lat, lng).unwrap()
    }

    struct Fixture {
        service: InMemoryCollectionService,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
    }

    impl Fixture {
        fn new() -> Self {
            let service = InMemoryCollectionService::in_memory(OptimizerSettings::default()).unwrap();
            let tenant_id = TenantId::new();
            let collector_id = service
                .register_collector(
                    tenant_id,
                    RegisterCollectorRequest {
                        user_id: UserId::new(),
                        daily_target: 0,
                        monthly_target: 0,
                        regions: vec![],
                    },
                )
                .unwrap()
                .id_typed();
            Self {
                service,
                tenant_id,
                collector_id,
            }
        }

        /// One customer with one invoice of `amount`, visited at `location`.
        fn task(&self, amount: u64, location: Option<GeoPoint>) -> CollectionTask {
            let customer_id = CustomerId::generate();
            self.service.set_customer_site(
                self.tenant_id,
                customer_id,
                CustomerSite {
                    location,
                    address: None,
                },
            );
            self.service
                .issue_invoice(
                    self.tenant_id,
                    IssueInvoiceRequest {
                        customer_id,
                        total_amount: amount,
                        due_date: Utc::now() + Duration::days(14),
                    },
                )
                .unwrap();
            let mut tasks = self
                .service
                .assign_tasks(
                    self.tenant_id,
                    AssignTasksRequest {
                        customer_ids: vec![customer_id],
                        collector_id: self.collector_id,
                        priority: Default::default(),
                        notes: None,
                    },
                )
                .unwrap();
            assert_eq!(tasks.len(), 1);
            tasks.remove(0)
        }

        fn optimize(&self, task_ids: Vec<TaskId>, start: GeoPoint) -> fieldcollect_collections::Route {
            let report = self
                .service
                .optimize_route(
                    self.tenant_id,
                    OptimizeRouteRequest {
                        collector_id: self.collector_id,
                        task_ids,
                        start_location: start,
                        end_location: None,
                        date: None,
                    },
                )
                .unwrap();
            assert!(report.is_clean(), "{:?}", report.issues);
            report.route
        }

        fn collect(&self, task_id: TaskId, amount: u64) -> crate::service::TransitionReport {
            self.service
                .collect(
                    self.tenant_id,
                    task_id,
                    CollectRequest {
                        amount,
                        payment_method: PaymentMethod::Cash,
                        signature: Some("sig".into()),
                        receipt_photo: None,
                    },
                )
                .unwrap()
        }
    }

    #[test]
    fn day_of_collection_follows_the_nearest_neighbor_order() {
        let fx = Fixture::new();
        let task1 = fx.task(5, Some(point(30.01, 31.0)));
        let task2 = fx.task(10, Some(point(30.02, 31.0)));
        let task3 = fx.task(3, Some(point(30.005, 31.0)));
        let ids = vec![task1.id_typed(), task2.id_typed(), task3.id_typed()];

        let route = fx.optimize(ids, point(30.0, 31.0));
        assert_eq!(
            route.optimized_order(),
            &[task3.id_typed(), task1.id_typed(), task2.id_typed()]
        );
        assert_eq!(route.optimized_by(), Some("nearest-neighbor"));
        // 0.02° of latitude, walked monotonically.
        assert!((route.total_distance() - 2_223.9).abs() < 5.0);
        let expected_minutes = route.total_distance() / 500.0 + 3.0 * 10.0;
        assert!((route.estimated_duration() - expected_minutes).abs() < 1e-9);

        let attached = fx.service.get_task(fx.tenant_id, task3.id_typed()).unwrap();
        assert_eq!(attached.route().map(|r| r.route_id), Some(route.id_typed()));
        assert_eq!(attached.route().and_then(|r| r.route_order), Some(1));
        assert_eq!(attached.status(), TaskStatus::Assigned);

        let route_id = route.id_typed();
        fx.service.start_route(fx.tenant_id, route_id).unwrap();
        for task in [&task3, &task1, &task2] {
            fx.service.visit_task(fx.tenant_id, task.id_typed()).unwrap();
            let report = fx.collect(task.id_typed(), task.amount());
            assert!(report.is_clean(), "{:?}", report.issues);
        }

        let route = fx.service.get_route(fx.tenant_id, route_id).unwrap();
        assert_eq!(route.stats().total_collected, 18);
        assert_eq!(route.stats().completed_tasks, 3);
        assert_eq!(route.stats().skipped_tasks, 0);

        let report = fx.service.complete_route(fx.tenant_id, route_id).unwrap();
        assert_eq!(report.route.status(), RouteStatus::Completed);

        let collector = fx.service.get_collector(fx.tenant_id, fx.collector_id).unwrap();
        assert_eq!(collector.stats().total_collected, 18);
        assert_eq!(collector.stats().successful_visits, 3);
        assert_eq!(collector.success_rate(), 1.0);

        let row = fx.service.routes().get(fx.tenant_id, &route_id).unwrap();
        assert_eq!(row.total_collected, 18);
        assert_eq!(row.status, RouteStatus::Completed);
    }

    #[test]
    fn route_stats_are_recomputed_from_task_state() {
        let fx = Fixture::new();
        let tasks: Vec<_> = (0..5)
            .map(|i| fx.task(10 * (i + 1), Some(point(30.0 + 0.001 * i as f64, 31.0))))
            .collect();
        let route = fx.optimize(tasks.iter().map(CollectionTask::id_typed).collect(), point(30.0, 31.0));

        fx.collect(tasks[0].id_typed(), 10);
        fx.collect(tasks[1].id_typed(), 15);
        fx.service
            .skip_task(fx.tenant_id, tasks[2].id_typed(), "shop closed")
            .unwrap();

        let route = fx.service.reconcile_route(fx.tenant_id, route.id_typed()).unwrap();
        let stats = route.stats();
        assert_eq!(stats.total_tasks, 5);
        assert_eq!(stats.completed_tasks, 2);
        assert_eq!(stats.skipped_tasks, 1);
        assert_eq!(stats.failed_tasks, 0);
        assert_eq!(stats.total_collected, 25);

        // Nothing changed since, so reconciling again appends nothing.
        let events_before = fx
            .service
            .pipeline()
            .dispatcher()
            .store()
            .load_stream(fx.tenant_id, route.id_typed().0)
            .unwrap()
            .len();
        fx.service.reconcile_route(fx.tenant_id, route.id_typed()).unwrap();
        let events_after = fx
            .service
            .pipeline()
            .dispatcher()
            .store()
            .load_stream(fx.tenant_id, route.id_typed().0)
            .unwrap()
            .len();
        assert_eq!(events_before, events_after);
    }

    #[test]
    fn tasks_without_coordinates_stay_on_the_route_unsequenced() {
        let fx = Fixture::new();
        let located: Vec<_> = (1..=3)
            .map(|i| fx.task(20, Some(point(30.0 + 0.002 * i as f64, 31.0))))
            .collect();
        let nowhere = fx.task(20, None);

        let mut ids: Vec<_> = located.iter().map(CollectionTask::id_typed).collect();
        ids.insert(1, nowhere.id_typed());
        let route = fx.optimize(ids, point(30.0, 31.0));

        assert_eq!(route.tasks().len(), 4);
        assert_eq!(route.optimized_order().len(), 3);
        assert!(!route.optimized_order().contains(&nowhere.id_typed()));

        let attached = fx.service.get_task(fx.tenant_id, nowhere.id_typed()).unwrap();
        assert_eq!(attached.route().map(|r| r.route_id), Some(route.id_typed()));
        assert_eq!(attached.route().and_then(|r| r.route_order), None);
    }

    #[test]
    fn all_locationless_tasks_still_produce_a_route() {
        let fx = Fixture::new();
        let a = fx.task(7, None);
        let b = fx.task(8, None);

        let route = fx.optimize(vec![a.id_typed(), b.id_typed()], point(30.0, 31.0));
        assert_eq!(route.tasks().len(), 2);
        assert!(route.optimized_order().is_empty());
        assert_eq!(route.total_distance(), 0.0);
        assert_eq!(route.estimated_duration(), 0.0);
    }

    #[test]
    fn optimizer_rejects_foreign_and_finalized_tasks() {
        let fx = Fixture::new();
        let done = fx.task(5, Some(point(30.01, 31.0)));
        fx.collect(done.id_typed(), 5);

        let err = fx
            .service
            .optimize_route(
                fx.tenant_id,
                OptimizeRouteRequest {
                    collector_id: fx.collector_id,
                    task_ids: vec![done.id_typed()],
                    start_location: point(30.0, 31.0),
                    end_location: None,
                    date: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let other_collector = fx
            .service
            .register_collector(
                fx.tenant_id,
                RegisterCollectorRequest {
                    user_id: UserId::new(),
                    daily_target: 0,
                    monthly_target: 0,
                    regions: vec![],
                },
            )
            .unwrap()
            .id_typed();
        let open = fx.task(5, Some(point(30.02, 31.0)));
        let err = fx
            .service
            .optimize_route(
                fx.tenant_id,
                OptimizeRouteRequest {
                    collector_id: other_collector,
                    task_ids: vec![open.id_typed()],
                    start_location: point(30.0, 31.0),
                    end_location: None,
                    date: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = fx
            .service
            .optimize_route(
                fx.tenant_id,
                OptimizeRouteRequest {
                    collector_id: fx.collector_id,
                    task_ids: vec![TaskId::generate()],
                    start_location: point(30.0, 31.0),
                    end_location: None,
                    date: None,
                },
            )
            .unwrap_err();
        assert!(err.is_not_found());

        // Rejected requests never reserve the day.
        let route = fx.optimize(vec![open.id_typed()], point(30.0, 31.0));
        assert_eq!(route.tasks(), &[open.id_typed()]);
    }

    /// A ledger whose backend is down.
    struct OfflineLedger;

    impl InvoiceLedger for OfflineLedger {
        fn outstanding_invoices(
            &self,
            _tenant_id: TenantId,
            _customer_id: CustomerId,
        ) -> Result<Vec<OutstandingInvoice>, PortError> {
            Err(PortError::Unavailable("billing offline".into()))
        }

        fn register_payment(
            &self,
            _tenant_id: TenantId,
            _invoice_id: fieldcollect_invoicing::InvoiceId,
            _amount: u64,
            _occurred_at: chrono::DateTime<Utc>,
        ) -> Result<PaymentReceipt, PortError> {
            Err(PortError::Unavailable("billing offline".into()))
        }
    }

    #[test]
    fn failed_invoice_update_is_reported_but_the_collection_stands() {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: InMemoryBus = Arc::new(fieldcollect_events::InMemoryEventBus::new());
        let subscription = bus.subscribe();
        let service = CollectionService::new(store, bus, OptimizerSettings::default()).unwrap();
        let tenant_id = TenantId::new();
        let collector_id = service
            .register_collector(
                tenant_id,
                RegisterCollectorRequest {
                    user_id: UserId::new(),
                    daily_target: 0,
                    monthly_target: 0,
                    regions: vec![],
                },
            )
            .unwrap()
            .id_typed();
        let fx = Fixture {
            service,
            tenant_id,
            collector_id,
        };

        let task = fx.task(60, Some(point(30.0, 31.0)));
        let route = fx.optimize(vec![task.id_typed()], point(30.0, 31.0));
        let service = fx.service.with_ledger(Arc::new(OfflineLedger));

        let report = service
            .collect(
                fx.tenant_id,
                task.id_typed(),
                CollectRequest {
                    amount: 60,
                    payment_method: PaymentMethod::BankTransfer,
                    signature: None,
                    receipt_photo: None,
                },
            )
            .unwrap();

        assert_eq!(report.task.status(), TaskStatus::Collected);
        assert_eq!(report.issues.len(), 1);
        assert!(matches!(
            &report.issues[0],
            ReconciliationIssue::InvoicePayment { invoice_id, .. } if Some(*invoice_id) == task.invoice_id()
        ));

        // The other follow-ups still ran.
        let collector = service.get_collector(fx.tenant_id, collector_id).unwrap();
        assert_eq!(collector.stats().total_collected, 60);
        let route = service.get_route(fx.tenant_id, route.id_typed()).unwrap();
        assert_eq!(route.stats().completed_tasks, 1);

        let invoice_id = task.invoice_id().unwrap();
        let invoice = service.get_invoice(fx.tenant_id, invoice_id).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Open);

        let published: Vec<String> = subscription
            .drain()
            .into_iter()
            .map(|e| e.event_type().to_string())
            .collect();
        assert!(published.iter().any(|t| t == "collections.task.collected"));
    }

    #[test]
    fn voided_invoice_surfaces_as_a_payment_issue() {
        let fx = Fixture::new();
        let task = fx.task(30, None);
        let invoice_id = task.invoice_id().unwrap();
        fx.service
            .pipeline()
            .dispatch(
                fx.tenant_id,
                invoice_id.0,
                crate::projections::invoices::INVOICE_AGGREGATE_TYPE,
                fieldcollect_invoicing::InvoiceCommand::VoidInvoice(fieldcollect_invoicing::VoidInvoice {
                    tenant_id: fx.tenant_id,
                    invoice_id,
                    reason: Some("written off".into()),
                    occurred_at: Utc::now(),
                }),
                |id| fieldcollect_invoicing::Invoice::empty(fieldcollect_invoicing::InvoiceId::new(id)),
            )
            .unwrap();

        let report = fx.collect(task.id_typed(), 30);
        assert_eq!(report.task.status(), TaskStatus::Collected);
        assert!(matches!(report.issues.as_slice(), [ReconciliationIssue::InvoicePayment { .. }]));
    }

    #[test]
    fn terminal_tasks_reject_every_transition() {
        let fx = Fixture::new();
        let task = fx.task(12, None);
        fx.service.fail_task(fx.tenant_id, task.id_typed(), "dog in yard").unwrap();
        let before = fx.service.get_task(fx.tenant_id, task.id_typed()).unwrap();

        assert!(fx.service.visit_task(fx.tenant_id, task.id_typed()).is_err());
        assert!(fx.service.start_task(fx.tenant_id, task.id_typed()).is_err());
        assert!(fx.service.skip_task(fx.tenant_id, task.id_typed(), "again").is_err());
        let err = fx
            .service
            .collect(
                fx.tenant_id,
                task.id_typed(),
                CollectRequest {
                    amount: 1,
                    payment_method: PaymentMethod::Cash,
                    signature: None,
                    receipt_photo: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Dispatch(DispatchError::Validation(_))));

        let after = fx.service.get_task(fx.tenant_id, task.id_typed()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn tenants_never_see_each_other() {
        let fx = Fixture::new();
        let task = fx.task(40, Some(point(30.0, 31.0)));
        let route = fx.optimize(vec![task.id_typed()], point(30.0, 31.0));
        let intruder = TenantId::new();

        assert!(fx.service.get_task(intruder, task.id_typed()).unwrap_err().is_not_found());
        assert!(fx.service.get_route(intruder, route.id_typed()).unwrap_err().is_not_found());
        assert!(fx.service.get_collector(intruder, fx.collector_id).unwrap_err().is_not_found());
        assert!(fx.service.today_route(intruder, fx.collector_id).unwrap().is_none());
        assert!(fx
            .service
            .tasks_near(intruder, point(30.0, 31.0), 1_000.0, false)
            .unwrap()
            .is_empty());

        let err = fx.service.visit_task(intruder, task.id_typed()).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            fx.service.get_task(fx.tenant_id, task.id_typed()).unwrap().status(),
            TaskStatus::Assigned
        );
    }

    #[test]
    fn read_models_rebuild_to_the_same_state() {
        let fx = Fixture::new();
        let task = fx.task(9, Some(point(30.0, 31.0)));
        fx.optimize(vec![task.id_typed()], point(30.0, 31.0));
        fx.collect(task.id_typed(), 9);

        let before = fx.service.tasks().get(fx.tenant_id, &task.id_typed()).unwrap();
        fx.service.rebuild_read_models(fx.tenant_id).unwrap();
        let after = fx.service.tasks().get(fx.tenant_id, &task.id_typed()).unwrap();
        assert_eq!(before, after);
        assert!(fx.service.today_route(fx.tenant_id, fx.collector_id).unwrap().is_some());
    }
}
