use crate::action::{Action, AdminAction};
use crate::error::BookingError;
use crate::session::{RoomCreationStep, RoomDraft, Session, SessionLookup, Wizard};
use crate::view::{Button, Reply, View};

use super::{Bot, BotError, Ctx};

fn abort_row() -> Vec<Button> {
    vec![Button::new("Cancel", Action::Admin(AdminAction::Abort))]
}

impl Bot {
    pub(super) async fn start_room_creation(&self, ctx: &Ctx) -> Result<(), BotError> {
        let mut wizard = Wizard::new(RoomCreationStep::AwaitingRoomName, ctx.chat_id, RoomDraft);
        let reply = Reply::new(View::AskRoomName).row(abort_row());
        wizard.message_id = Some(self.show(ctx, None, reply).await?);
        self.sessions.begin(ctx.user_id, Session::RoomCreation(wizard));
        Ok(())
    }

    /// A rejected name leaves the wizard waiting for another one.
    pub(super) async fn room_name_text(&self, ctx: &Ctx, text: &str) -> Result<(), BotError> {
        if !ctx.role.is_admin() {
            self.sessions.remove(ctx.user_id);
            return self.reply(ctx, View::Unauthorized).await;
        }
        let room = self.service.admin_create_room(text).await?;
        self.sessions.remove(ctx.user_id);
        self.digest.wake_detached();
        self.reply(ctx, View::RoomCreated { room }).await
    }

    pub(super) async fn deactivate_picker(&self, ctx: &Ctx) -> Result<(), BotError> {
        let rooms = self.service.list_rooms().await?;
        let buttons: Vec<Button> = rooms
            .iter()
            .map(|r| Button::new(r.name.clone(), Action::Admin(AdminAction::Deactivate(r.id))))
            .collect();
        let reply = Reply::new(View::DeactivatePicker { rooms })
            .column(buttons)
            .row(abort_row());
        self.reply(ctx, reply).await
    }

    pub(super) async fn activate_picker(&self, ctx: &Ctx) -> Result<(), BotError> {
        let rooms: Vec<_> = self
            .service
            .list_all_rooms()
            .await?
            .into_iter()
            .filter(|r| !r.is_active)
            .collect();
        if rooms.is_empty() {
            return Err(BookingError::NoRoomsAvailable.into());
        }
        let buttons: Vec<Button> = rooms
            .iter()
            .map(|r| Button::new(r.name.clone(), Action::Admin(AdminAction::Activate(r.id))))
            .collect();
        let reply = Reply::new(View::ActivatePicker { rooms })
            .column(buttons)
            .row(abort_row());
        self.reply(ctx, reply).await
    }

    /// Callers have already checked the admin role.
    pub(super) async fn on_admin_action(&self, ctx: &Ctx, action: AdminAction) -> Result<(), BotError> {
        match action {
            AdminAction::Deactivate(id) => {
                let room = self.service.get_room(id).await?;
                if !room.is_active {
                    return Err(BookingError::RoomInactive(id).into());
                }
                let reply = Reply::new(View::ConfirmDeactivate { room }).row(vec![
                    Button::new("Deactivate", Action::Admin(AdminAction::ConfirmDeactivate(id))),
                    Button::new("Cancel", Action::Admin(AdminAction::Abort)),
                ]);
                self.show(ctx, ctx.message_id, reply).await?;
            }
            AdminAction::ConfirmDeactivate(id) => {
                let room = self.service.admin_deactivate_room(id).await?;
                self.digest.wake_detached();
                self.show(ctx, ctx.message_id, View::RoomDeactivated { room })
                    .await?;
            }
            AdminAction::Activate(id) => {
                let room = self.service.admin_activate_room(id).await?;
                self.digest.wake_detached();
                self.show(ctx, ctx.message_id, View::RoomActivated { room })
                    .await?;
            }
            AdminAction::Abort => {
                if let SessionLookup::Found(Session::RoomCreation(_)) = self.sessions.get(ctx.user_id) {
                    self.sessions.remove(ctx.user_id);
                }
                let is_admin = ctx.role.is_admin();
                self.show(ctx, ctx.message_id, View::MainMenu { is_admin }).await?;
            }
        }
        Ok(())
    }
}
